//! Interactive console: menu, prompts, and printing of outcomes.
//!
//! The console never touches the network. It turns typed letters into
//! [`Command`]s, hands them to the event loop and prints what comes back.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc;

use stash_services::runtime::{self, Command, Outcome, Request};

/// A menu selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Register,
    Search,
    List,
    Withdraw,
    Quit,
    Blank,
    Unknown(char),
}

pub fn parse_choice(line: &str) -> Choice {
    let Some(c) = line.trim().chars().next() else {
        return Choice::Blank;
    };
    match c.to_ascii_uppercase() {
        'R' => Choice::Register,
        'S' => Choice::Search,
        'O' => Choice::List,
        'T' => Choice::Withdraw,
        'Q' => Choice::Quit,
        other => Choice::Unknown(other),
    }
}

pub fn print_menu() {
    println!("═══════════════════════════════════════");
    println!("  R  register content");
    println!("  S  search and download");
    println!("  O  list registered content");
    println!("  T  deregister content");
    println!("  Q  quit");
    println!("═══════════════════════════════════════");
}

/// Print `label` and read one line. `None` at end of input.
pub async fn prompt<R>(lines: &mut Lines<R>, label: &str) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|l| l.trim().to_string()))
}

/// Read a non-empty peer name. `None` at end of input.
pub async fn prompt_peer_id<R>(lines: &mut Lines<R>) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match prompt(lines, "peer name: ").await? {
            Some(name) if name.is_empty() => println!("peer name cannot be empty"),
            other => return Ok(other),
        }
    }
}

/// Read menu commands until quit, end of input or ctrl-c.
pub async fn run<R>(mut lines: Lines<R>, commands: mpsc::Sender<Request>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    print_menu();
    loop {
        let line = tokio::select! {
            line = prompt(&mut lines, "> ") => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                None
            }
        };

        let command = match line {
            None => Command::Quit,
            Some(line) => match parse_choice(&line) {
                Choice::Blank => {
                    print_menu();
                    continue;
                }
                Choice::Unknown(c) => {
                    println!("unknown command {c:?}");
                    continue;
                }
                Choice::Quit => Command::Quit,
                Choice::List => Command::List,
                Choice::Register => {
                    let Some(content) = prompt(&mut lines, "content name: ").await? else {
                        break quit(&commands).await;
                    };
                    let Some(filename) = prompt(&mut lines, "file name: ").await? else {
                        break quit(&commands).await;
                    };
                    Command::Advertise { content, filename }
                }
                Choice::Search => {
                    let Some(content) = prompt(&mut lines, "content name: ").await? else {
                        break quit(&commands).await;
                    };
                    Command::Fetch { content }
                }
                Choice::Withdraw => {
                    let Some(content) = prompt(&mut lines, "content name: ").await? else {
                        break quit(&commands).await;
                    };
                    Command::Withdraw { content }
                }
            },
        };

        let outcome = runtime::submit(&commands, command).await?;
        for line in describe(&outcome) {
            println!("{line}");
        }
        if matches!(outcome, Outcome::Stopped(_)) {
            return Ok(());
        }
    }
}

async fn quit(commands: &mpsc::Sender<Request>) -> Result<()> {
    let outcome = runtime::submit(commands, Command::Quit).await?;
    for line in describe(&outcome) {
        println!("{line}");
    }
    Ok(())
}

/// Operator-facing lines for one outcome.
pub fn describe(outcome: &Outcome) -> Vec<String> {
    match outcome {
        Outcome::Advertised(Ok(a)) => {
            vec![format!("registered {:?} at {}:{}", a.content, a.ip, a.port)]
        }
        Outcome::Advertised(Err(e)) => vec![format!("register failed: {e}")],

        Outcome::Fetched(Ok(report)) => {
            let p = &report.provider;
            let f = &report.fetched;
            let mut out = vec![format!(
                "provider {} at {}:{}",
                p.peer, p.ip, p.port
            )];
            if f.bytes == 0 {
                out.push(format!("warning: received 0 bytes, saved empty {}", f.path.display()));
            } else {
                out.push(format!("saved {} bytes to {}", f.bytes, f.path.display()));
            }
            if !f.complete {
                out.push("warning: transfer ended early".to_string());
            }
            out.push(match &report.auto {
                Ok(a) => format!("[auto] registered {:?} at {}:{}", a.content, a.ip, a.port),
                Err(e) => format!("[auto] register failed: {e}"),
            });
            out
        }
        Outcome::Fetched(Err(e)) => vec![format!("search failed: {e}")],

        Outcome::Listed(Ok(listing)) => {
            let mut out = vec![format!("{:<10}  {:<10}  {:<15}  {}", "PEER", "CONTENT", "IP", "PORT")];
            out.extend(
                listing
                    .rows
                    .iter()
                    .map(|r| format!("{:<10}  {:<10}  {:<15}  {}", r.peer, r.content, r.ip, r.port)),
            );
            if listing.rows.is_empty() {
                out.push("(no content registered)".to_string());
            }
            if !listing.complete {
                out.push("warning: listing incomplete".to_string());
            }
            out
        }
        Outcome::Listed(Err(e)) => vec![format!("list failed: {e}")],

        Outcome::Withdrawn { content, result: Ok(()) } => vec![format!("deregistered {content:?}")],
        Outcome::Withdrawn { content, result: Err(e) } => {
            vec![format!("deregister {content:?} failed: {e}")]
        }

        Outcome::Stopped(d) => vec![format!("deregistered {} of {} entries, bye", d.withdrawn, d.total)],
    }
}
