//! Commit author resolution

use regex::Regex;
use std::sync::OnceLock;

pub const BOT_EMAIL: &str = "devtron-bot@devtron.ai";
pub const BOT_NAME: &str = "devtron bot";

/// Author identity for a Git commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committer {
    pub email: String,
    pub name: String,
}

/// Resolve the commit author.
///
/// The acting user's email wins unless it is empty or a system account;
/// then the active config's email; then the bot identity.
pub fn resolve_committer(user_email: Option<&str>, config_email: Option<&str>) -> Committer {
    let usable_user = user_email
        .map(str::trim)
        .filter(|e| !e.is_empty() && *e != "admin" && *e != "system");
    let email = usable_user
        .or_else(|| config_email.map(str::trim).filter(|e| !e.is_empty()));

    match email {
        Some(email) => Committer {
            email: email.to_string(),
            name: name_from_email(email),
        },
        None => Committer {
            email: BOT_EMAIL.to_string(),
            name: BOT_NAME.to_string(),
        },
    }
}

/// Local part of the email with non-word characters replaced by spaces
pub fn name_from_email(email: &str) -> String {
    static NON_WORD: OnceLock<Option<Regex>> = OnceLock::new();
    let local = email.split('@').next().unwrap_or(email);
    match NON_WORD.get_or_init(|| Regex::new(r"[^\w]").ok()) {
        Some(re) => re.replace_all(local, " ").into_owned(),
        None => local.to_string(),
    }
}
