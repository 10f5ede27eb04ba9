use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use client_core::{
    auth::LoginClient, config::DEFAULT_SETTINGS_FILE, CandidateList, ClientEvent, Settings,
    VotingClient,
};
use shared::domain::{CandidateId, Role};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ballot", about = "Operate the voting contract from the command line")]
struct Args {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    /// Required when a login server is configured.
    #[arg(long)]
    voter_id: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every candidate with its vote count.
    Candidates,
    /// Show the voting window.
    Window,
    /// Show the connection mode, account and whether it has voted.
    Status,
    AddCandidate {
        name: String,
        party: String,
    },
    Vote {
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        candidate_id: u64,
    },
    /// Dates are calendar days in UTC, e.g. 2025-06-01.
    SetDates {
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl Command {
    fn requires_admin(&self) -> bool {
        matches!(self, Self::AddCandidate { .. } | Self::SetDates { .. })
    }

    fn mutates(&self) -> bool {
        matches!(
            self,
            Self::AddCandidate { .. } | Self::Vote { .. } | Self::SetDates { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();

    let settings = Settings::load_from(&args.config)
        .with_context(|| format!("loading settings from {}", args.config.display()))?;
    authorize(&settings, &args).await?;

    let client = VotingClient::connect(&settings).await?;
    let mut events = client.subscribe_events();

    match args.command {
        Command::Candidates => print_candidates(&client.load_candidates().await?),
        Command::Window => match client.voting_window().await? {
            Some(window) => println!("Voting window: {window}"),
            None => println!("Voting dates have not been set."),
        },
        Command::Status => {
            println!("Connection: {}", client.connection_mode());
            println!("Account:    {}", client.account());
            println!("Contract:   {}", client.binding().address());
            println!("Has voted:  {}", client.has_voted().await?);
        }
        Command::AddCandidate { name, party } => {
            let outcome = client.add_candidate(&name, &party).await;
            report(outcome.is_ok_and(|o| o.is_confirmed()), &mut events)?;
        }
        Command::Vote { candidate_id } => {
            let outcome = client.vote(CandidateId::new(candidate_id)).await;
            report(outcome.is_ok_and(|o| o.is_confirmed()), &mut events)?;
        }
        Command::SetDates { start, end } => {
            let outcome = client.set_dates_from_calendar(start, end).await;
            report(outcome.is_ok_and(|o| o.is_confirmed()), &mut events)?;
        }
    }
    Ok(())
}

/// Checks credentials against the login server, when one is configured.
async fn authorize(settings: &Settings, args: &Args) -> Result<()> {
    let Some(login_url) = settings.login_url.as_deref() else {
        return Ok(());
    };
    if !args.command.mutates() {
        return Ok(());
    }
    let (Some(voter_id), Some(password)) = (args.voter_id.as_deref(), args.password.as_deref())
    else {
        bail!("--voter-id and --password are required when login_url is configured");
    };

    let role = LoginClient::new(login_url).login(voter_id, password).await?;
    info!(%voter_id, %role, "logged in");
    ensure_permitted(&args.command, voter_id, role)
}

fn ensure_permitted(command: &Command, voter_id: &str, role: Role) -> Result<()> {
    if command.requires_admin() && role != Role::Admin {
        bail!("voter '{voter_id}' is not an admin");
    }
    Ok(())
}

fn print_candidates(list: &CandidateList) {
    if list.no_candidates {
        println!("No candidates added yet.");
        return;
    }
    println!("{:>4}  {:<24} {:<16} {:>6}", "ID", "NAME", "PARTY", "VOTES");
    for candidate in &list.candidates {
        println!(
            "{:>4}  {:<24} {:<16} {:>6}",
            candidate.id.get(), candidate.name, candidate.party, candidate.vote_count
        );
    }
    for err in &list.errors {
        println!("{:>4}  <{}>", err.id.get(), err.message);
    }
}

/// Prints the notifications and refreshed list the write produced.
fn report(confirmed: bool, events: &mut broadcast::Receiver<ClientEvent>) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        match event {
            ClientEvent::Notification { message, .. } => println!("{message}"),
            ClientEvent::CandidatesRefreshed(list) => print_candidates(&list),
        }
    }
    if !confirmed {
        bail!("transaction was not confirmed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(argv: &[&str]) -> Command {
        Args::try_parse_from(std::iter::once("ballot").chain(argv.iter().copied()))
            .expect("valid arguments")
            .command
    }

    #[test]
    fn admin_actions_require_admin_role() {
        for argv in [
            &["add-candidate", "Ada", "Blue"][..],
            &["set-dates", "2025-06-01", "2025-06-10"][..],
        ] {
            let command = command(argv);
            assert!(ensure_permitted(&command, "voter1", Role::User).is_err());
            assert!(ensure_permitted(&command, "admin", Role::Admin).is_ok());
        }
    }

    #[test]
    fn voters_may_vote_and_read() {
        for argv in [&["vote", "2"][..], &["candidates"][..], &["status"][..]] {
            assert!(ensure_permitted(&command(argv), "voter1", Role::User).is_ok());
        }
    }

    #[test]
    fn only_writes_need_a_login() {
        assert!(command(&["vote", "1"]).mutates());
        assert!(!command(&["window"]).mutates());
    }

    #[test]
    fn candidate_zero_is_rejected_while_parsing() {
        assert!(Args::try_parse_from(["ballot", "vote", "0"]).is_err());
        assert!(matches!(
            command(&["vote", "1"]),
            Command::Vote { candidate_id: 1 }
        ));
    }

    #[test]
    fn set_dates_parses_calendar_days() {
        match command(&["set-dates", "2025-06-01", "2025-06-10"]) {
            Command::SetDates { start, end } => {
                assert_eq!(start, NaiveDate::from_ymd_opt(2025, 6, 1).expect("date"));
                assert_eq!(end, NaiveDate::from_ymd_opt(2025, 6, 10).expect("date"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
