//! The interactive command loop: one line of input, one command.

use std::sync::Arc;

use gazette_core::{Driver, Peer};

const USAGE: &str = "commands:
  list                 known peers and their catalogs
  titles <nick>        ask a peer for its document titles
  news <nick> [n]      fetch a peer's n newest documents (default: all)
  rank                 poll the network for everyone's rating
  rank <nick>          poll the network for one peer's rating
  rank <nick> <1-5>    store your own rating for a peer
  clear                clear the screen
  quit                 leave the network";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    List,
    Clear,
    Quit,
    RankAll,
    RankQuery(String),
    Rate(String, u8),
    Titles(String),
    News { nick: String, count: usize },
    Unknown,
}

pub fn parse(line: &str) -> Command {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [] => Command::Empty,
        ["help"] => Command::Help,
        ["list"] => Command::List,
        ["clear"] => Command::Clear,
        ["quit"] => Command::Quit,
        ["rank"] => Command::RankAll,
        ["rank", nick] => Command::RankQuery(nick.to_string()),
        ["rank", nick, score] => match score.parse::<u8>() {
            Ok(score) => Command::Rate(nick.to_string(), score),
            Err(_) => Command::Unknown,
        },
        ["titles", nick] => Command::Titles(nick.to_string()),
        ["news", nick] => Command::News {
            nick: nick.to_string(),
            count: 0,
        },
        ["news", nick, count] => match count.parse::<usize>() {
            Ok(count) => Command::News {
                nick: nick.to_string(),
                count,
            },
            Err(_) => Command::Unknown,
        },
        _ => Command::Unknown,
    }
}

/// Execute one input line. Returns false when the loop should end.
pub async fn handle(driver: &Arc<Driver>, line: &str) -> bool {
    match parse(line) {
        Command::Empty => {}
        Command::Help | Command::Unknown => println!("{USAGE}"),
        Command::Quit => return false,
        Command::Clear => print!("\x1b[2J\x1b[1;1H"),
        Command::List => {
            let table = render_list(&driver.directory().local(), &driver.directory().peers());
            driver.display().command_result("list", &table);
        }
        Command::RankAll => driver.start_rank_query(None).await,
        Command::RankQuery(nick) => driver.start_rank_query(Some(&nick)).await,
        Command::Rate(nick, score) => driver.rate_peer(&nick, score),
        Command::Titles(nick) => match driver.directory().get(&nick) {
            Some(peer) => driver.request_titles(peer.addr),
            None => driver
                .display()
                .command_result(&format!("titles {nick}"), &format!("{nick} is not on the network")),
        },
        Command::News { nick, count } => match driver.directory().get(&nick) {
            Some(peer) => driver.request_news(peer.addr, count).await,
            None => driver
                .display()
                .command_result(&format!("news {nick}"), &format!("{nick} is not on the network")),
        },
    }
    true
}

fn render_rating(rating: u8) -> String {
    if rating == 0 {
        "-".to_string()
    } else {
        rating.to_string()
    }
}

fn render_list(local: &Peer, peers: &[Peer]) -> String {
    let mut out = String::from("peer\t\tdocuments\tnewest\t\t\t\trating");
    out.push_str(&format!(
        "\n{} (you)\t{}\t\t{}",
        local.name,
        local.total_docs,
        local.format_last_doc_date()
    ));
    for peer in peers {
        out.push_str(&format!(
            "\n{}\t\t{}\t\t{}\t{}",
            peer.name,
            peer.total_docs,
            peer.format_last_doc_date(),
            render_rating(peer.rating)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn parse_recognises_every_command() {
        assert_eq!(parse(""), Command::Empty);
        assert_eq!(parse("  list "), Command::List);
        assert_eq!(parse("rank"), Command::RankAll);
        assert_eq!(parse("rank bob"), Command::RankQuery("bob".to_string()));
        assert_eq!(parse("rank bob 4"), Command::Rate("bob".to_string(), 4));
        assert_eq!(parse("titles bob"), Command::Titles("bob".to_string()));
        assert_eq!(
            parse("news bob 3"),
            Command::News {
                nick: "bob".to_string(),
                count: 3
            }
        );
        assert_eq!(
            parse("news bob"),
            Command::News {
                nick: "bob".to_string(),
                count: 0
            }
        );
        assert_eq!(parse("quit"), Command::Quit);
    }

    #[test]
    fn malformed_lines_fall_back_to_usage() {
        assert_eq!(parse("rank bob many"), Command::Unknown);
        assert_eq!(parse("news bob -1"), Command::Unknown);
        assert_eq!(parse("dance"), Command::Unknown);
        assert_eq!(parse("titles"), Command::Unknown);
    }

    #[test]
    fn list_shows_local_and_peers() {
        let addr: SocketAddr = "10.0.0.1:7355".parse().unwrap();
        let local = Peer::new("alice", addr);
        let mut bob = Peer::new("bob", addr);
        bob.total_docs = 2;
        bob.last_doc_date = 1700000000;
        bob.rating = 4;

        let table = render_list(&local, &[bob]);
        assert!(table.contains("alice (you)"));
        assert!(table.contains("bob"));
        assert!(table.contains('4'));
        assert!(table.contains("2023"));
    }
}
