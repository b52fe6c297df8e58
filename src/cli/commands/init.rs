use crate::cli::commands::open_engine;
use crate::cli::parser::{Cli, Commands};
use crate::config::Config;
use crate::db::log;
use crate::errors::AppResult;
use crate::ui::messages::{field, info, success, warning};
use std::fs;
use std::path::{Path, PathBuf};

/// Handle the `init` command
///
/// Creates, when missing:
///  - the configuration file (with every default filled in)
///  - the SQLite database, migrated to the latest schema
///  - the token keypair
///  - the reserved admin account
pub fn handle(cli: &Cli) -> AppResult<()> {
    let Commands::Init {
        divisions,
        admin_user,
        admin_password,
        force,
    } = &cli.command
    else {
        return Ok(());
    };

    let path = cli
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_file);

    let mut cfg = if path.exists() && !*force {
        warning(format!(
            "Keeping existing configuration {} (use --force to rewrite it)",
            path.display()
        ));
        Config::load(&path)?
    } else {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Config::in_dir(dir)
    };

    if let Some(names) = divisions {
        cfg.divisions = names.iter().map(|n| n.trim().to_string()).collect();
    }
    if let Some(db) = &cli.db {
        cfg.database = db.clone();
    }
    cfg.validate()?;

    if !path.exists() || *force || divisions.is_some() || cli.db.is_some() {
        cfg.save(&path)?;
    }

    info("Initializing rguestlog…");
    field("config", path.display());
    field("database", &cfg.database);

    if let Some(parent) = Path::new(&cfg.database).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let engine = open_engine(&cfg)?;
    field("private key", &cfg.privkey);
    field("public key", &cfg.pubkey);
    field("divisions", cfg.divisions.join(", "));

    match engine.staff().bootstrap_admin(admin_user, admin_password)? {
        Some(user) => success(format!("Admin account '{}' created (id {})", user.username, user.id)),
        None => info("Admin account already present"),
    }

    if let Err(e) = engine.pool().with_conn(|conn| {
        log::audit(
            conn,
            "init",
            &cfg.database,
            "Database initialized",
        )
    }) {
        warning(format!("Failed to write internal log: {}", e));
    }

    success("rguestlog initialization completed");
    Ok(())
}
