use std::io::{self, Write};

use anyhow::Result;
use console::style;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::input::{read_input, Input, HELP};
use mcpchat::agent::{Agent, ChatOptions};
use mcpchat::models::message::Message;
use mcpchat::models::role::Role;

pub struct Session {
    agent: Agent,
}

impl Session {
    pub fn new(agent: Agent) -> Self {
        Session { agent }
    }

    pub async fn start(&mut self) -> Result<()> {
        println!(
            "mcpchat ({}) {}",
            self.agent.model(),
            style("- type \"exit\" to end the session, /help for commands").dim()
        );

        loop {
            match read_input()? {
                Input::AskAgain => continue,
                Input::Exit => break,
                Input::Help => println!("{}", style(HELP).dim()),
                Input::Reset => {
                    self.agent.reset_conversation();
                    println!("{}", style("Started a new conversation.").dim());
                }
                Input::SetModel(model) => {
                    self.agent.set_model(model);
                    println!(
                        "{}",
                        style(format!("Now using {}", self.agent.model())).dim()
                    );
                }
                Input::History => print_history(self.agent.conversation()),
                Input::Message(message) => self.process_message(&message).await?,
            }
        }
        Ok(())
    }

    pub async fn headless(&mut self, message: &str) -> Result<()> {
        self.process_message(message).await
    }

    /// Stream the agent's reply to stdout. Ctrl-C cancels the reply and
    /// returns to the prompt.
    async fn process_message(&mut self, message: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        let mut stream = self
            .agent
            .chat(message, ChatOptions::default().with_cancel(cancel.clone()));
        let mut stdout = io::stdout();

        loop {
            tokio::select! {
                fragment = stream.next() => {
                    match fragment {
                        Some(Ok(text)) => {
                            print!("{}", text);
                            stdout.flush()?;
                        }
                        Some(Err(e)) => {
                            eprintln!("{}", style(format!("Error: {}", e)).red());
                            break;
                        }
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    // Keep polling so the agent can wind down
                    cancel.cancel();
                }
            }
        }
        println!();
        Ok(())
    }
}

fn print_history(conversation: &[Message]) {
    for message in conversation {
        let label = match message.role {
            Role::System => style("system").dim(),
            Role::User => style("you").green(),
            Role::Assistant => style("assistant").cyan(),
            Role::Tool => style("tool").yellow(),
        };
        let mut body = message.content.clone();
        for call in &message.tool_calls {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&format!("-> {}({})", call.name, call.arguments));
        }
        println!("{}: {}", label.bold(), body);
    }
}
