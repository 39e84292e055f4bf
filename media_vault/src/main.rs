//! Media Vault - CLI
//!
//! Command-line interface for vault operations.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;

use media_vault::crypto::BlockDecryptReader;
use media_vault::vault::encrypt_to_file;
use media_vault::{MediaType, ScanQuery, TagFilterMode, Vault, VaultConfig, VaultKey};

#[derive(Parser)]
#[command(name = "media-vault")]
#[command(version = media_vault::VERSION)]
#[command(about = "Media Vault - encrypted media storage")]
struct Cli {
    /// Vault path
    #[arg(short, long, default_value = "./vault")]
    vault: PathBuf,

    /// JSON configuration file (overrides --vault)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vault key, 64 hex characters
    #[arg(short, long, env = "MEDIA_VAULT_KEY", hide_env_values = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Image,
    Video,
    Audio,
}

impl From<Kind> for MediaType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Image => MediaType::Image,
            Kind::Video => MediaType::Video,
            Kind::Audio => MediaType::Audio,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    All,
    Any,
    None,
}

impl From<Mode> for TagFilterMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::All => TagFilterMode::AllOf,
            Mode::Any => TagFilterMode::AnyOf,
            Mode::None => TagFilterMode::NoneOf,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a vault and print a fresh key when none is given
    Init,

    /// Import a media file
    Add {
        /// File to import
        path: PathBuf,

        /// Media type
        #[arg(short = 't', long, value_enum, default_value = "image")]
        kind: Kind,

        /// Title (file name when omitted)
        #[arg(long)]
        title: Option<String>,
    },

    /// Decrypt the original file of a media
    Export {
        /// Media ID
        id: u64,

        /// Output path
        output: PathBuf,
    },

    /// Delete a media
    Delete {
        /// Media ID
        id: u64,
    },

    /// Tag a media
    Tag {
        /// Media ID
        id: u64,

        /// Tag name
        name: String,
    },

    /// Remove a tag from a media
    Untag {
        /// Media ID
        id: u64,

        /// Tag ID
        tag: u64,
    },

    /// List tags
    Tags,

    /// Search media by tags
    Search {
        /// Tag filter
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// How the tag filter applies
        #[arg(short, long, value_enum, default_value = "all")]
        mode: Mode,

        /// Newest first
        #[arg(short, long)]
        reverse: bool,

        /// Continue after this media ID
        #[arg(long)]
        from: Option<u64>,

        /// Page size
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Random sample of media
    Random {
        /// Sample a single tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Sampling seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Sample size
        #[arg(short, long, default_value_t = 20)]
        limit: u64,
    },

    /// Remove media folders missing from the index
    Fix,

    /// Index media folders missing from the index
    Recover,

    /// Block-encrypt a standalone file
    EncryptFile {
        input: PathBuf,
        output: PathBuf,
    },

    /// Decrypt a block-encrypted file
    DecryptFile {
        input: PathBuf,
        output: PathBuf,
    },

    /// Show vault statistics
    Stats,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<VaultConfig> {
    match &cli.config {
        Some(path) => VaultConfig::load(path)
            .with_context(|| format!("reading config {}", path.display())),
        None => Ok(VaultConfig::new(&cli.vault)),
    }
}

fn require_key(cli: &Cli) -> Result<VaultKey> {
    match &cli.key {
        Some(encoded) => Ok(VaultKey::from_hex(encoded.trim()).context("invalid vault key")?),
        None => bail!("vault key required (--key or MEDIA_VAULT_KEY)"),
    }
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

fn run(cli: Cli) -> Result<()> {
    // Standalone file commands do not open a vault
    match &cli.command {
        Commands::EncryptFile { input, output } => {
            let key = require_key(&cli)?;
            let size = fs::metadata(input)?.len();
            let mut source = File::open(input)?;
            encrypt_to_file(&mut source, size, output, &key)?;
            println!("🔐 Encrypted {} bytes to {}", size, output.display());
            return Ok(());
        }
        Commands::DecryptFile { input, output } => {
            let key = require_key(&cli)?;
            let mut reader = BlockDecryptReader::open(input, &key)?;
            let mut out = BufWriter::new(File::create(output)?);
            let copied = io::copy(&mut reader, &mut out)?;
            println!("🔓 Decrypted {} bytes to {}", copied, output.display());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    debug!("Using config {:?}", config);

    if let Commands::Init = cli.command {
        let vault = Vault::open(config)?;
        println!("✅ Vault ready at: {}", vault.path().display());
        if cli.key.is_none() {
            let key = VaultKey::generate();
            println!("🔑 New vault key (keep it safe, it cannot be recovered):");
            println!("   {}", hex::encode(key.expose()));
        }
        return Ok(());
    }

    let key = require_key(&cli)?;
    let vault = Vault::open(config)?;

    match cli.command {
        Commands::Add { path, kind, title } => {
            let title = match title {
                Some(title) => title,
                None => path
                    .file_stem()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
            };

            let size = fs::metadata(&path)?.len();
            let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;

            let id = vault.create_media(kind.into(), &title, &key)?;
            vault.import_original(id, file, size, &file_extension(&path), &key)?;

            println!("✅ Media imported with ID: {}", id);
        }

        Commands::Export { id, output } => {
            let mut out = BufWriter::new(File::create(&output)?);
            match vault.export_original(id, &mut out, &key)? {
                Some(bytes) => println!("📤 Exported {} bytes to {}", bytes, output.display()),
                None => bail!("media {} has no original", id),
            }
        }

        Commands::Delete { id } => match vault.delete_media(id, &key)? {
            Some(deletion) => {
                if deletion.join().is_err() {
                    bail!("background deletion of media {} panicked", id);
                }
                println!("🗑️ Media {} deleted", id);
            }
            None => bail!("media {} not found", id),
        },

        Commands::Tag { id, name } => {
            let tag_id = vault.tag_media(id, &name, &key)?;
            println!("🏷️ Media {} tagged with #{} ({})", id, tag_id, name.trim());
        }

        Commands::Untag { id, tag } => {
            if vault.untag_media(id, tag, &key)? {
                println!("✅ Tag #{} removed from media {}", tag, id);
            } else {
                println!("Media {} did not have tag #{}", id, tag);
            }
        }

        Commands::Tags => {
            let list = vault.tag_list(&key)?;
            if list.tags.is_empty() {
                println!("📭 No tags in vault");
            } else {
                println!("🏷️ Tags ({}):", list.tags.len());
                println!("{:-<40}", "");
                for (id, name) in &list.tags {
                    println!("{:>6}  {}", id, name);
                }
            }
        }

        Commands::Search {
            tags,
            mode,
            reverse,
            from,
            limit,
        } => {
            let query = ScanQuery {
                mode: mode.into(),
                tags,
                reversed: reverse,
                continue_from: from,
                ..Default::default()
            };

            let page = vault.search_page(&query, limit, &key)?;
            for id in &page.ids {
                println!("{}", id);
            }
            println!("{:-<40}", "");
            println!("Scanned {}/{}", page.scanned, page.total);
            if let Some(next) = page.continue_from {
                if page.ids.len() == limit {
                    println!("Next page: --from {}", next);
                }
            }
        }

        Commands::Random { tag, seed, limit } => {
            let seed = seed.unwrap_or_else(rand::random);
            for id in vault.random_page(tag.as_deref(), seed, limit, &key)? {
                println!("{}", id);
            }
        }

        Commands::Fix => {
            let report = vault.fix_consistency()?;
            println!("🔧 Checked {} media folders", report.checked);
            println!("   Misplaced removed: {}", report.misplaced.len());
            println!("   Unindexed removed: {}", report.removed.len());
            if report.is_clean() {
                println!("💚 Vault is consistent!");
            }
        }

        Commands::Recover => {
            let report = vault.recover_assets()?;
            println!("🔄 Checked {} media folders", report.checked);
            println!("   Recovered: {}", report.recovered.len());
            for id in &report.recovered {
                println!("   - {}", id);
            }
        }

        Commands::Stats => {
            let stats = vault.stats(&key)?;
            println!("📊 Media Vault Statistics");
            println!("{:-<40}", "");
            println!("Media:            {}", stats.media_count);
            println!("Tags:             {}", stats.tag_count);
            println!("Open media:       {}", stats.open_media);
            println!("Open tag indexes: {}", stats.open_tag_indexes);
        }

        Commands::Init | Commands::EncryptFile { .. } | Commands::DecryptFile { .. } => {}
    }

    Ok(())
}
