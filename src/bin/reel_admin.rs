#![forbid(unsafe_code)]

//! Command line companion to the server: sets up the administrator login and
//! audits the storage root against the video table.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use highlight_reel::{
    config::{DEFAULT_CONFIG_PATH, load_runtime_config_from},
    intake::FileIntake,
    security::{ensure_not_root, hash_password, validate_password_strength},
    store::VideoStore,
};
use std::{
    collections::HashSet,
    io::{self, BufRead, Write},
    path::PathBuf,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Administer the highlight-reel showcase.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to the config file"
    )]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or replace the single administrator login.
    SetCredential {
        #[arg(long = "username", value_name = "NAME", help = "Administrator username")]
        username: String,
        #[arg(
            long = "password-stdin",
            help = "Read the password from the first line of stdin instead of prompting"
        )]
        password_stdin: bool,
    },
    /// Compare the files in the storage root with the video records.
    Audit {
        #[arg(
            long = "prune-orphans",
            help = "Delete files that no video record refers to"
        )]
        prune_orphans: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    ensure_not_root("reel_admin")?;

    let config = load_runtime_config_from(&cli.config, std::env::vars())
        .with_context(|| format!("Loading configuration from {}", cli.config.display()))?;
    let store = VideoStore::open(&config.database_path)
        .with_context(|| format!("Opening database {}", config.database_path.display()))?;

    match cli.command {
        Command::SetCredential {
            username,
            password_stdin,
        } => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let password = if password_stdin {
                read_line(&mut input)?
            } else {
                prompt_new_password(&mut input)?
            };
            set_credential(&store, &username, &password)?;
            println!("Administrator credential stored for '{}'.", username.trim());
        }
        Command::Audit { prune_orphans } => {
            let intake = FileIntake::new(config.storage_root.clone()).with_context(|| {
                format!("Opening storage root {}", config.storage_root.display())
            })?;
            let report = audit_storage(&store, &intake)?;
            print_report(&report, &intake);
            if prune_orphans {
                let removed = prune(&intake, &report.orphans)?;
                println!("Removed {} orphan file(s).", removed);
            }
        }
    }

    Ok(())
}

fn read_line(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    let read = input.read_line(&mut line).context("Reading password")?;
    if read == 0 {
        bail!("no password provided on stdin");
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_new_password(input: &mut impl BufRead) -> Result<String> {
    print!("New administrator password: ");
    io::stdout().flush()?;
    let password = read_line(input)?;
    print!("Confirm password: ");
    io::stdout().flush()?;
    let confirmation = read_line(input)?;
    if password != confirmation {
        bail!("passwords do not match");
    }
    Ok(password)
}

/// Hashes and stores the credential. Weak passwords are refused before
/// anything is written.
fn set_credential(store: &VideoStore, username: &str, password: &str) -> Result<()> {
    let username = username.trim();
    if username.is_empty() {
        bail!("username must not be empty");
    }
    validate_password_strength(password)?;
    let hash = hash_password(password)?;
    store
        .set_admin_credential(username, &hash)
        .context("Storing administrator credential")?;
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct AuditReport {
    /// Files with no record. Tolerated, but they waste space.
    orphans: Vec<String>,
    /// (id, filename) of records whose file is gone.
    dangling: Vec<(i64, String)>,
}

fn audit_storage(store: &VideoStore, intake: &FileIntake) -> Result<AuditReport> {
    let on_disk: HashSet<String> = intake
        .stored_names()
        .context("Listing storage root")?
        .into_iter()
        .collect();
    let referenced: HashSet<String> = store
        .filenames()
        .context("Listing video filenames")?
        .into_iter()
        .collect();

    let mut orphans: Vec<String> = on_disk.difference(&referenced).cloned().collect();
    orphans.sort();

    let dangling = store
        .list_all()
        .context("Listing videos")?
        .into_iter()
        .filter(|record| !on_disk.contains(&record.filename))
        .map(|record| (record.id, record.filename))
        .collect();

    Ok(AuditReport { orphans, dangling })
}

fn print_report(report: &AuditReport, intake: &FileIntake) {
    println!("Storage root: {}", intake.root().display());
    if report.orphans.is_empty() && report.dangling.is_empty() {
        println!("Storage and database agree.");
        return;
    }
    if !report.orphans.is_empty() {
        println!("Orphan files ({}):", report.orphans.len());
        for name in &report.orphans {
            println!("  - {}", name);
        }
    }
    if !report.dangling.is_empty() {
        println!("Records with missing files ({}):", report.dangling.len());
        for (id, name) in &report.dangling {
            println!("  - #{} {}", id, name);
        }
    }
}

fn prune(intake: &FileIntake, orphans: &[String]) -> Result<usize> {
    let mut removed = 0;
    for name in orphans {
        match intake.delete(name) {
            Ok(()) => removed += 1,
            Err(err) => eprintln!("  Warning: failed to remove {}: {}", name, err),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use highlight_reel::security::verify_password;
    use highlight_reel::store::NewVideo;
    use std::io::Cursor;
    use tempfile::{TempDir, tempdir};

    fn temp_setup() -> Result<(TempDir, VideoStore, FileIntake)> {
        let dir = tempdir()?;
        let store = VideoStore::open(dir.path().join("reel.db"))?;
        let intake = FileIntake::new(dir.path().join("uploads"))?;
        Ok((dir, store, intake))
    }

    fn insert(store: &VideoStore, filename: &str) -> Result<i64> {
        Ok(store.insert(&NewVideo {
            title: "clip",
            description: "",
            filename,
            featured: false,
        })?)
    }

    #[test]
    fn set_credential_hashes_password() -> Result<()> {
        let (_dir, store, _intake) = temp_setup()?;
        set_credential(&store, " curator ", "a-long-enough-secret")?;

        let stored = store.admin_credential()?.expect("credential stored");
        assert_eq!(stored.username, "curator");
        assert_ne!(stored.password_hash, "a-long-enough-secret");
        assert!(verify_password("a-long-enough-secret", &stored.password_hash)?);
        Ok(())
    }

    #[test]
    fn set_credential_refuses_weak_input() -> Result<()> {
        let (_dir, store, _intake) = temp_setup()?;
        assert!(set_credential(&store, "admin", "admin123").is_err());
        assert!(set_credential(&store, "  ", "a-long-enough-secret").is_err());
        assert!(store.admin_credential()?.is_none());
        Ok(())
    }

    #[test]
    fn prompt_requires_matching_entries() -> Result<()> {
        let mut matching = Cursor::new("a-long-enough-secret\na-long-enough-secret\n");
        assert_eq!(prompt_new_password(&mut matching)?, "a-long-enough-secret");

        let mut mismatched = Cursor::new("a-long-enough-secret\nsomething-else\n");
        assert!(prompt_new_password(&mut mismatched).is_err());

        let mut empty = Cursor::new("");
        assert!(read_line(&mut empty).is_err());
        Ok(())
    }

    #[test]
    fn audit_reports_orphans_and_dangling_records() -> Result<()> {
        let (_dir, store, intake) = temp_setup()?;
        intake.store(b"kept", "kept.mp4")?;
        intake.store(b"stray", "stray.mp4")?;
        insert(&store, "kept.mp4")?;
        let missing = insert(&store, "missing.mp4")?;

        let report = audit_storage(&store, &intake)?;
        assert_eq!(report.orphans, vec!["stray.mp4".to_string()]);
        assert_eq!(report.dangling, vec![(missing, "missing.mp4".to_string())]);

        assert_eq!(prune(&intake, &report.orphans)?, 1);
        assert!(!intake.exists("stray.mp4"));
        assert!(intake.exists("kept.mp4"));
        Ok(())
    }

    #[test]
    fn audit_of_consistent_storage_is_empty() -> Result<()> {
        let (_dir, store, intake) = temp_setup()?;
        intake.store(b"kept", "kept.mp4")?;
        insert(&store, "kept.mp4")?;
        assert_eq!(audit_storage(&store, &intake)?, AuditReport::default());
        Ok(())
    }
}
