use crate::coordinator::Command;

pub const HELP: &str = "\
/start_game_vote    propose a new game
/start_game         agree to the proposed game
/move <choice>      commit to rock, paper, scissors, lizard or spock
/peers              list players in the room
/quit               leave the room
anything else is sent as a chat message";

/// One line typed by the local player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line {
    Command(Command),
    Peers,
    Help,
    Quit,
    Blank,
}

pub fn parse(input: &str) -> anyhow::Result<Line> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Line::Blank);
    }
    if !input.starts_with('/') {
        return Ok(Line::Command(Command::Say(input.to_string())));
    }

    let mut words = input.split_whitespace();
    let line = match (words.next(), words.next()) {
        (Some("/start_game_vote"), None) => Line::Command(Command::ProposeGame),
        (Some("/start_game"), None) => Line::Command(Command::Agree),
        (Some("/move"), Some(choice)) => Line::Command(Command::Play(choice.parse()?)),
        (Some("/move"), None) => anyhow::bail!("usage: /move <choice>"),
        (Some("/peers"), None) => Line::Peers,
        (Some("/help"), None) => Line::Help,
        (Some("/quit"), None) => Line::Quit,
        (Some(cmd), _) => anyhow::bail!("unknown command {}, type /help to see all commands", cmd),
        (None, _) => Line::Blank,
    };
    Ok(line)
}
