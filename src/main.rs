//! cipherfs - transparently encrypted files on the local filesystem
//!
//! Usage:
//!   cipherfs init --root <dir>   - Create a configuration for a mount root
//!   cipherfs cat <path>          - Print the plaintext view of a file
//!   cipherfs write <path>        - Replace a file with data read from stdin
//!   cipherfs iv <path>           - Show the relative name and IV of a file
//!   cipherfs status              - Show the mount configuration
//!   cipherfs sweep               - Remove scratch files of dead processes

use cipherfs::{
    channel::sweep_stale,
    config::Config,
    crypto::{derive_iv, derive_key, generate_key, generate_salt, KEY_SIZES},
    fs::EncryptedFs,
    Error, Result,
};
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cipherfs")]
#[command(version = "0.1.0")]
#[command(about = "Transparently encrypted files on the local filesystem")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/cipherfs/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new configuration
    Init {
        /// Root directory that relative names are computed against
        #[arg(long)]
        root: PathBuf,

        /// Keep plaintext on disk and expose ciphertext
        #[arg(long)]
        reverse: bool,

        /// Derive the key from a passphrase instead of storing it
        #[arg(long)]
        passphrase: bool,

        /// Key size in bytes (16, 24 or 32)
        #[arg(long, default_value_t = 32)]
        key_size: usize,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Write the plaintext view of a file to stdout
    Cat {
        /// File path
        path: PathBuf,
    },

    /// Replace a file with data read from stdin
    Write {
        /// File path
        path: PathBuf,
    },

    /// Show the relative name and IV of a file
    Iv {
        /// File path
        path: PathBuf,
    },

    /// Show the mount configuration
    Status,

    /// Remove scratch files left behind by dead processes
    Sweep,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Init {
            root,
            reverse,
            passphrase,
            key_size,
            force,
        } => cmd_init(config_path, &root, reverse, passphrase, key_size, force),

        Commands::Cat { path } => cmd_cat(config_path, &path),

        Commands::Write { path } => cmd_write(config_path, &path),

        Commands::Iv { path } => cmd_iv(config_path, &path),

        Commands::Status => cmd_status(config_path),

        Commands::Sweep => cmd_sweep(config_path),
    }
}

fn cmd_init(
    config_path: &Path,
    root: &Path,
    reverse: bool,
    passphrase: bool,
    key_size: usize,
    force: bool,
) -> Result<()> {
    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path.display().to_string()));
    }
    if !KEY_SIZES.contains(&key_size) {
        return Err(Error::Config(format!("Unsupported key size: {}", key_size)));
    }

    std::fs::create_dir_all(root)?;
    let root = std::fs::canonicalize(root)?;

    let mut config = Config::new(&root, reverse);
    config.kdf.key_size = key_size;

    if passphrase {
        config.kdf.salt = generate_salt().to_vec();
        let first = prompt_passphrase("Enter passphrase: ")?;
        let second = prompt_passphrase("Repeat passphrase: ")?;
        if first != second {
            return Err(Error::Config("Passphrases do not match".to_string()));
        }
    } else {
        config.mount.key = Some(generate_key(key_size));
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(config_path)?;

    info!("Configuration saved to {:?}", config_path);
    info!("Root: {:?}", root);
    info!(
        "Mode: {}",
        if reverse {
            "reverse (plaintext on disk)"
        } else {
            "forward (ciphertext on disk)"
        }
    );
    if !passphrase {
        warn!("The key is stored in the configuration file; keep it private");
    }

    Ok(())
}

fn cmd_cat(config_path: &Path, path: &Path) -> Result<()> {
    let fs = open_mount(config_path)?;
    let path = fs.path(std::path::absolute(path)?);

    let contents = fs.read(&path)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&contents)?;
    stdout.flush()?;

    debug!("Read {} bytes from {}", contents.len(), path);
    Ok(())
}

fn cmd_write(config_path: &Path, path: &Path) -> Result<()> {
    let fs = open_mount(config_path)?;
    let path = fs.path(std::path::absolute(path)?);

    let mut contents = Vec::new();
    std::io::stdin().lock().read_to_end(&mut contents)?;
    fs.write(&path, &contents)?;

    info!("Wrote {} bytes to {}", contents.len(), path);
    Ok(())
}

fn cmd_iv(config_path: &Path, path: &Path) -> Result<()> {
    let fs = open_mount(config_path)?;
    let path = fs.path(std::path::absolute(path)?);

    let name = path.relative_name()?;
    let iv = derive_iv(&name, fs.config().cipher().block_size())?;

    println!("Relative name: {}", name);
    println!("IV: {}", hex::encode(iv));
    Ok(())
}

fn cmd_status(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let spec = config.mount.cipher_spec()?;

    println!("cipherfs Status");
    println!("===============");
    println!();
    println!("Configuration: {:?}", config_path);
    println!("Scheme: {}", config.scheme);
    println!("Cipher: {}", spec);
    println!(
        "Root: {}",
        config.mount.root_uri.as_deref().unwrap_or("/")
    );
    println!(
        "Mode: {}",
        if config.mount.reverse {
            "reverse"
        } else {
            "forward"
        }
    );
    println!(
        "Scratch directory: {:?}",
        config
            .mount
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    );
    match &config.mount.key {
        Some(key) => println!("Key: stored ({} bits)", key.len() * 8),
        None => println!(
            "Key: derived from passphrase ({} bits, Argon2id)",
            config.kdf.key_size * 8
        ),
    }

    Ok(())
}

fn cmd_sweep(config_path: &Path) -> Result<()> {
    let dir = match Config::load(config_path) {
        Ok(config) => config
            .mount
            .scratch_dir
            .unwrap_or_else(std::env::temp_dir),
        Err(e) => {
            debug!("No usable configuration ({}), sweeping the temp dir", e);
            std::env::temp_dir()
        }
    };

    let removed = sweep_stale(&dir)?;
    println!("Removed {} stale scratch file(s) from {:?}", removed, dir);
    Ok(())
}

/// Load the configuration and build its mount, prompting for a passphrase
/// when the key is not stored
fn open_mount(config_path: &Path) -> Result<Arc<EncryptedFs>> {
    let mut config = Config::load(config_path)?;

    if config.needs_passphrase() {
        let passphrase = prompt_passphrase("Enter passphrase: ")?;
        let key = derive_key(
            passphrase.as_bytes(),
            &config.kdf.salt,
            &config.kdf,
            config.kdf.key_size,
        )?;
        config.mount.key = Some(key);
    }

    let fs = EncryptedFs::from_options(config.scheme.clone(), &config.mount)?;

    match fs.sweep_scratch() {
        Ok(0) => {}
        Ok(n) => info!("Removed {} stale scratch file(s)", n),
        Err(e) => warn!("Scratch sweep failed: {}", e),
    }

    Ok(fs)
}

fn prompt_passphrase(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).map_err(|e| Error::Internal(e.to_string()))
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
