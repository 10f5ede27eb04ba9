use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::domain::Role;
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/voters.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Registers a voter, or resets the password and role of an existing one.
    CreateVoter {
        voter_id: String,
        password: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },
    SetRole {
        voter_id: String,
        role: Role,
    },
    ShowVoter {
        voter_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateVoter {
            voter_id,
            password,
            role,
        } => {
            storage.upsert_voter(&voter_id, &password, role).await?;
            println!("stored voter_id={voter_id} role={role}");
        }
        Command::SetRole { voter_id, role } => {
            if !storage.set_role(&voter_id, role).await? {
                bail!("no voter with id '{voter_id}'");
            }
            println!("updated voter_id={voter_id} role={role}");
        }
        Command::ShowVoter { voter_id } => match storage.find_voter(&voter_id).await? {
            Some(voter) => println!(
                "voter_id={} role={} created_at={}",
                voter.voter_id, voter.role, voter.created_at
            ),
            None => bail!("no voter with id '{voter_id}'"),
        },
    }

    Ok(())
}
