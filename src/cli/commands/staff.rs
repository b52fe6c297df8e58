use crate::cli::commands::open_engine;
use crate::cli::parser::{Commands, StaffAction};
use crate::config::Config;
use crate::core::auth::AuthContext;
use crate::errors::AppResult;
use crate::models::division::DivisionId;
use crate::models::staff::NewStaff;
use crate::ui::messages::{info, success, warning};
use std::io::{self, Write};

/// Ask a yes/no confirmation from the user
fn ask_confirmation(prompt: &str) -> bool {
    warning(prompt);
    print!("Confirm [y/N]: ");
    let _ = io::stdout().flush();

    let mut s = String::new();
    if io::stdin().read_line(&mut s).is_ok() {
        matches!(s.trim().to_lowercase().as_str(), "y" | "yes")
    } else {
        false
    }
}

/// Handle `staff add|list|update|passwd|del`. The local command line acts as the system
/// caller.
pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    let Commands::Staff { action } = cmd else {
        return Ok(());
    };

    let engine = open_engine(cfg)?;
    let directory = engine.staff();
    let auth = AuthContext::system();

    match action {
        StaffAction::Add {
            username,
            password,
            division,
            admin,
        } => {
            let user = directory.add_staff(
                &auth,
                NewStaff {
                    username: username.clone(),
                    password: password.clone(),
                    division: division.map(DivisionId),
                    is_admin: *admin,
                },
            )?;
            success(format!("Staff account '{}' created (id {})", user.username, user.id));
        }

        StaffAction::List => {
            let users = directory.list(&auth)?;
            if users.is_empty() {
                info("No staff accounts.");
                return Ok(());
            }
            println!("{:>4}  {:<20} {:<16} {:<6} {:<6}", "ID", "USERNAME", "DIVISION", "ADMIN", "ACTIVE");
            for u in users {
                let division = u
                    .division
                    .and_then(|d| engine.divisions().name(d).map(str::to_string))
                    .unwrap_or_else(|| "*".to_string());
                println!(
                    "{:>4}  {:<20} {:<16} {:<6} {:<6}",
                    u.id,
                    u.username,
                    division,
                    if u.is_admin { "yes" } else { "no" },
                    if u.active { "yes" } else { "no" },
                );
            }
        }

        StaffAction::Update {
            id,
            division,
            unbind,
            admin,
            active,
        } => {
            let current = directory.get(&auth, *id)?;
            let division = if *unbind {
                None
            } else {
                division.map(DivisionId).or(current.division)
            };
            let user = directory.update(
                &auth,
                *id,
                division,
                admin.unwrap_or(current.is_admin),
                active.unwrap_or(current.active),
            )?;
            success(format!(
                "Staff account '{}' updated (admin: {}, active: {})",
                user.username,
                if user.is_admin { "yes" } else { "no" },
                if user.active { "yes" } else { "no" },
            ));
        }

        StaffAction::Passwd { id, password } => {
            directory.set_password(&auth, *id, password)?;
            success(format!("Password of staff account #{} changed.", id));
        }

        StaffAction::Del { id, yes } => {
            if !*yes && !ask_confirmation(&format!("Delete staff account #{}? This action is irreversible.", id)) {
                info("Operation cancelled.");
                return Ok(());
            }
            directory.delete_staff(&auth, *id)?;
            success(format!("Staff account #{} deleted.", id));
        }
    }

    Ok(())
}
