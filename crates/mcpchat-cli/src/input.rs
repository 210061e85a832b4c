use anyhow::Result;
use cliclack::input;

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    /// Nothing useful was entered, ask again
    AskAgain,
    Message(String),
    Reset,
    SetModel(String),
    History,
    Help,
    Exit,
}

pub fn read_input() -> Result<Input> {
    let text: String = input("You:")
        .placeholder("")
        .required(false)
        .interact()?;
    Ok(parse_input(&text))
}

pub fn parse_input(text: &str) -> Input {
    let text = text.trim();
    if text.is_empty() {
        return Input::AskAgain;
    }
    if text.eq_ignore_ascii_case("exit") || text == "/exit" {
        return Input::Exit;
    }

    let Some(command) = text.strip_prefix('/') else {
        return Input::Message(text.to_string());
    };
    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };
    match name {
        "reset" => Input::Reset,
        "history" => Input::History,
        "model" if !argument.is_empty() => Input::SetModel(argument.to_string()),
        _ => Input::Help,
    }
}

pub const HELP: &str = "\
/reset          start a new conversation
/model <id>     switch the model for the next messages
/history        show the conversation so far
exit            leave the session";
