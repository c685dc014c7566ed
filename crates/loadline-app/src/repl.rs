//! Line-oriented terminal front-end over a conversation view.

use std::collections::HashSet;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use loadline_chat::{ChatClient, ConversationHandle, ViewSnapshot, ViewState};
use loadline_types::api::{ProfileUpdate, SignUp};
use loadline_types::models::{ChatMessage, Counterpart, Profile};

pub const HELP: &str = "\
Commands:
  /register <email> <password> <name>   create an account
  /login <email> <password>             sign in
  /logout                               sign out
  /roster                               back to the roster (administrator)
  /open <n>                             open roster entry n (administrator)
  /refresh                              reload the current screen
  /profile                              show your profile
  /profile name|phone|address <value>   edit your profile
  /help                                 this text
  /quit                                 exit
Anything else is sent as a message.";

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Register {
        email: String,
        password: String,
        name: String,
    },
    Login {
        email: String,
        password: String,
    },
    Logout,
    Roster,
    Open(usize),
    Refresh,
    ShowProfile,
    EditProfile(ProfileField, String),
    Help,
    Quit,
    Say(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Phone,
    Address,
}

impl ProfileField {
    fn update(self, value: String) -> ProfileUpdate {
        let mut update = ProfileUpdate::default();
        match self {
            Self::Name => update.name = Some(value),
            Self::Phone => update.phone_number = Some(value),
            Self::Address => update.address = Some(value),
        }
        update
    }
}

/// Parse one input line. Lines not starting with `/` are messages.
pub fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Say(line.to_string()));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name {
        "register" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(email), Some(password), Some(name)) if !email.is_empty() && !name.trim().is_empty() => {
                    Ok(Input::Register {
                        email: email.to_string(),
                        password: password.to_string(),
                        name: name.trim().to_string(),
                    })
                }
                _ => Err("usage: /register <email> <password> <name>".into()),
            }
        }
        "login" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            [email, password] => Ok(Input::Login {
                email: email.to_string(),
                password: password.to_string(),
            }),
            _ => Err("usage: /login <email> <password>".into()),
        },
        "logout" => Ok(Input::Logout),
        "roster" => Ok(Input::Roster),
        "open" => rest
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(Input::Open)
            .ok_or_else(|| "usage: /open <n>".into()),
        "refresh" => Ok(Input::Refresh),
        "profile" if rest.is_empty() => Ok(Input::ShowProfile),
        "profile" => {
            let (field, value) = rest
                .split_once(char::is_whitespace)
                .map(|(f, v)| (f, v.trim()))
                .unwrap_or((rest, ""));
            let field = match field {
                "name" => ProfileField::Name,
                "phone" => ProfileField::Phone,
                "address" => ProfileField::Address,
                _ => return Err("usage: /profile name|phone|address <value>".into()),
            };
            if value.is_empty() {
                return Err("usage: /profile name|phone|address <value>".into());
            }
            Ok(Input::EditProfile(field, value.to_string()))
        }
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command /{} (try /help)", other)),
    }
}

/// Turns successive snapshots into terminal lines, printing only what is
/// new since the previous snapshot.
#[derive(Default)]
pub struct Printer {
    screen: Option<Screen>,
    printed: HashSet<Uuid>,
    roster: Vec<Counterpart>,
    last_error: Option<String>,
    live: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Screen {
    SignedOut,
    Roster(Uuid),
    /// `with` is only set for the administrator; a user has one thread,
    /// whether or not the administrator is known yet.
    Conversation { me: Uuid, with: Option<Uuid> },
}

impl Printer {
    pub fn render(&mut self, snapshot: &ViewSnapshot) -> Vec<String> {
        let mut out = Vec::new();
        let screen = match &snapshot.state {
            ViewState::NoIdentity => Screen::SignedOut,
            ViewState::Roster { me, .. } => Screen::Roster(me.id),
            ViewState::Conversation { me, counterpart, .. } => Screen::Conversation {
                me: me.id,
                with: counterpart.as_ref().filter(|_| me.is_admin).map(|c| c.id),
            },
        };
        let me = snapshot.identity().map(|i| i.id);

        if self.screen.as_ref() != Some(&screen) {
            self.printed.clear();
            self.roster.clear();
            match &snapshot.state {
                ViewState::NoIdentity => {
                    out.push("Signed out. /login <email> <password> or /register.".into());
                }
                ViewState::Roster { me, .. } => {
                    out.push(format!("-- {} | roster --", me.name));
                }
                ViewState::Conversation { me, counterpart, .. } => {
                    let with = counterpart
                        .as_ref()
                        .map(|c| c.name.as_str())
                        .unwrap_or("dispatch");
                    out.push(format!("-- {} | conversation with {} --", me.name, with));
                }
            }
            self.screen = Some(screen);
        }

        match &snapshot.state {
            ViewState::Roster {
                counterparts,
                loading,
                ..
            } => {
                if !loading && *counterparts != self.roster {
                    if counterparts.is_empty() {
                        out.push("  (no conversations yet)".into());
                    }
                    for (n, c) in counterparts.iter().enumerate() {
                        out.push(format!("  {}. {}", n + 1, c.name));
                    }
                    self.roster = counterparts.clone();
                }
            }
            ViewState::Conversation { messages, .. } => {
                for message in messages {
                    if self.printed.insert(message.id) {
                        out.push(format_message(message, me));
                    }
                }
            }
            ViewState::NoIdentity => {}
        }

        if snapshot.last_error != self.last_error {
            if let Some(error) = &snapshot.last_error {
                out.push(format!("! {}", error));
            }
            self.last_error = snapshot.last_error.clone();
        }

        if snapshot.live != self.live {
            if snapshot.live {
                out.push("(live)".into());
            } else if snapshot.identity().is_some() {
                out.push("(offline; /refresh to reload)".into());
            }
            self.live = snapshot.live;
        }

        out
    }
}

fn format_message(message: &ChatMessage, me: Option<Uuid>) -> String {
    let who = if Some(message.sender_id) == me {
        "you"
    } else {
        message.sender_name.as_deref().unwrap_or("unknown")
    };
    format!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        who,
        message.content
    )
}

fn format_profile(profile: &Profile) -> String {
    format!(
        "{}{} | phone: {} | address: {}",
        profile.name,
        if profile.is_admin { " (administrator)" } else { "" },
        profile.phone_number.as_deref().unwrap_or("-"),
        profile.address.as_deref().unwrap_or("-"),
    )
}

/// Read commands from stdin and print view updates until `/quit` or EOF.
pub async fn run(client: &ChatClient, view: &ConversationHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut updates = view.watch();
    let mut printer = Printer::default();

    println!("{}", HELP);
    let initial = updates.borrow_and_update().clone();
    print_lines(printer.render(&initial));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_input(&line) {
                    Ok(Input::Quit) => break,
                    Ok(input) => {
                        if let Err(e) = dispatch(client, view, input).await {
                            println!("! {}", e);
                        }
                    }
                    Err(usage) => println!("{}", usage),
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    debug!("View ended");
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_lines(printer.render(&snapshot));
            }
        }
    }

    Ok(())
}

async fn dispatch(client: &ChatClient, view: &ConversationHandle, input: Input) -> anyhow::Result<()> {
    match input {
        Input::Register {
            email,
            password,
            name,
        } => {
            let identity = client
                .session()
                .sign_up(&SignUp {
                    email,
                    password,
                    name,
                    phone_number: None,
                    address: None,
                })
                .await?;
            println!("Registered {} <{}>. Now /login.", identity.name, identity.email);
        }
        Input::Login { email, password } => {
            client.session().sign_in(&email, &password).await?;
        }
        Input::Logout => client.session().sign_out().await?,
        Input::Roster => view.show_roster().await?,
        Input::Open(n) => {
            let snapshot = view.snapshot();
            let Some(counterpart) = snapshot.counterparts().get(n - 1) else {
                anyhow::bail!("no roster entry {}", n);
            };
            view.open(counterpart.id).await?;
        }
        Input::Refresh => view.refresh().await?,
        Input::ShowProfile => {
            let profile = client.profiles().current().await?;
            println!("{}", format_profile(&profile));
        }
        Input::EditProfile(field, value) => {
            let profile = client.profiles().update(&field.update(value)).await?;
            println!("{}", format_profile(&profile));
        }
        Input::Help => println!("{}", HELP),
        Input::Say(text) => {
            view.compose(text).await?;
            view.send().await?;
        }
        Input::Quit => {}
    }
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}
