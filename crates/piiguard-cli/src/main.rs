//! piiguard: operator CLI for the PII encryption subsystem
//!
//! Commands:
//!   config check                      - validate piiguard.toml, print a redacted summary
//!   attr encrypt|decrypt [<value>]    - attribute encryption under the key ring
//!   attr status                       - list key generations in decrypt order
//!   attr audit [--migrate]            - scan ciphertexts on stdin, report per-generation usage
//!   pii encrypt|decrypt --salt <s>    - password-scoped PII fields
//!   ecc keygen|encrypt|decrypt        - P-256 envelopes, private keys sealed in the local vault
//!   session encrypt|decrypt           - session ciphertexts (dev KMS)
//!
//! Values are read from the argument, or from stdin when omitted or `-`.
//! Results go to stdout; logs go to stderr.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::io::{BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use piiguard_core::{decode_key, PiiguardConfig};
use piiguard_crypto::{AttributeEncryptor, DerivedKeyCache, KeyRing, PiiEncryptor};
use piiguard_secrets::{
    generate_keypair, EnvelopeEccEncryptor, KmsGateway, LayeredSessionEncryptor, LocalKeyVault,
    LocalKms, PrivateKeyVault,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "piiguard",
    version,
    about = "PII encryption and key rotation",
    long_about = "piiguard: encrypt, decrypt, audit and migrate PII ciphertexts under rotating keys"
)]
struct Cli {
    /// Path to piiguard.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PIIGUARD_CONFIG",
        default_value = "/etc/piiguard/piiguard.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging].level
    #[arg(long, env = "PIIGUARD_LOG")]
    log: Option<String>,

    /// Log format; overrides [logging].format
    #[arg(long, env = "PIIGUARD_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Attribute encryption with key rotation
    Attr {
        #[command(subcommand)]
        action: AttrAction,
    },

    /// Password-scoped PII encryption
    Pii {
        #[command(subcommand)]
        action: PiiAction,
    },

    /// Public-key envelope encryption
    Ecc {
        #[command(subcommand)]
        action: EccAction,
    },

    /// Session ciphertexts
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate every section and print a summary without secret values
    Check,
}

#[derive(Subcommand, Debug)]
enum AttrAction {
    /// Encrypt under the current key generation
    Encrypt { value: Option<String> },
    /// Decrypt, reporting the generation used on stderr
    Decrypt { value: Option<String> },
    /// List key generations in decrypt order
    Status,
    /// Read one ciphertext per line from stdin and report which generations they need
    Audit {
        /// Print each ciphertext re-encrypted under the current generation
        #[arg(long)]
        migrate: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PiiAction {
    Encrypt {
        #[command(flatten)]
        scope: PiiScope,
        value: Option<String>,
    },
    Decrypt {
        #[command(flatten)]
        scope: PiiScope,
        value: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct PiiScope {
    /// Per-user salt (at least 8 bytes)
    #[arg(long)]
    salt: String,
    /// Bind the ciphertext to this context (e.g. user UUID)
    #[arg(long)]
    context: Option<String>,
    /// User password (prompted when absent)
    #[arg(long, env = "PIIGUARD_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum EccAction {
    /// Generate a recipient key pair and seal its private key in the vault
    Keygen {
        #[arg(long)]
        identity: String,
        #[arg(long, env = "PIIGUARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Encrypt to a recipient public key (base64 SEC1)
    Encrypt {
        #[arg(long)]
        public_key: String,
        value: Option<String>,
    },
    /// Decrypt with a sealed private key
    Decrypt {
        /// Sealed private key blob printed by `ecc keygen`
        #[arg(long)]
        sealed_key: String,
        #[arg(long)]
        identity: String,
        #[arg(long, env = "PIIGUARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        value: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    Encrypt { value: Option<String> },
    Decrypt { value: Option<String> },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = PiiguardConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = match &cli.log_format {
        Some(f) => f.clone(),
        None => LogFormat::from_str(&config.logging.format, true)
            .map_err(|e| anyhow::anyhow!("logging.format: {e}"))?,
    };
    init_logging(level, &format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "piiguard starting"
    );

    let cache = DerivedKeyCache::shared();

    match cli.command {
        Commands::Config { action: ConfigAction::Check } => cmd_config_check(&config, &cli.config),
        Commands::Attr { action } => cmd_attr(&config, cache, action),
        Commands::Pii { action } => cmd_pii(&config, cache, action),
        Commands::Ecc { action } => cmd_ecc(&config, cache, action).await,
        Commands::Session { action } => cmd_session(&config, action).await,
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── `piiguard config check` ───────────────────────────────────────────────────

fn cmd_config_check(config: &PiiguardConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }

    match KeyRing::from_config(&config.attribute) {
        Ok(ring) => {
            println!("attribute: {} generation(s)", ring.len());
            for generation in ring.decrypt_order() {
                println!("  {:<16} cost {}", generation.id(), generation.cost());
            }
        }
        Err(e) => println!("attribute: not usable ({e})"),
    }
    println!(
        "pii:       cost {}, max stored cost {}",
        config.pii.cost, config.pii.max_cost
    );

    let session_key = match &config.session.encryption_key {
        Some(k) => decode_key(k, "session.encryption_key").map(|_| "set"),
        None => Ok("missing"),
    }?;
    println!(
        "session:   key {session_key}, writes {}, compress >= {} bytes",
        if config.session.writes_kms_layer()? { "s2 (kms)" } else { "s1 (legacy)" },
        config.session.compress_threshold
    );

    build_gateway(config)?;
    println!(
        "kms:       {}, key {}, region {}, timeout {} ms, chunk {} bytes, pepper {}",
        if config.kms.enabled { "enabled" } else { "disabled (local pepper)" },
        config.kms.key_id.as_deref().unwrap_or("-"),
        config.kms.region,
        config.kms.timeout_ms,
        config.kms.chunk_size,
        if config.kms.pepper.is_some() { "set" } else { "missing" },
    );
    println!(
        "vault:     cost {}, max stored cost {}, timeout {} ms",
        config.vault.cost, config.vault.max_cost, config.vault.timeout_ms
    );
    Ok(())
}

// ── `piiguard attr` ───────────────────────────────────────────────────────────

fn cmd_attr(config: &PiiguardConfig, cache: Arc<DerivedKeyCache>, action: AttrAction) -> Result<()> {
    let ring = KeyRing::from_config(&config.attribute).context("building attribute key ring")?;
    let encryptor = AttributeEncryptor::new(ring, cache);

    match action {
        AttrAction::Encrypt { value } => {
            println!("{}", encryptor.encrypt(read_value(value)?.as_bytes())?);
        }
        AttrAction::Decrypt { value } => {
            let detailed = encryptor.decrypt_detailed(read_value(value)?.trim())?;
            eprintln!(
                "generation: {}{}",
                detailed.generation,
                if detailed.stale { " (stale)" } else { "" }
            );
            println!("{}", String::from_utf8_lossy(&detailed.plaintext));
        }
        AttrAction::Status => {
            for (i, generation) in encryptor.ring().decrypt_order().enumerate() {
                let role = if i == 0 { "current" } else { "retired" };
                println!("{:>2}  {:<16} {:<8} {}", i, generation.id(), role, generation.cost());
            }
        }
        AttrAction::Audit { migrate } => cmd_attr_audit(&encryptor, migrate)?,
    }
    Ok(())
}

fn cmd_attr_audit(encryptor: &AttributeEncryptor, migrate: bool) -> Result<()> {
    let mut failures = 0usize;
    let mut migrated = 0usize;

    for (lineno, line) in std::io::stdin().lock().lines().enumerate() {
        let line = line.context("reading stdin")?;
        let ciphertext = line.trim();
        if ciphertext.is_empty() {
            continue;
        }

        if migrate {
            match encryptor.reencrypt_if_stale(ciphertext) {
                Ok(Some(fresh)) => {
                    migrated += 1;
                    println!("{fresh}");
                }
                Ok(None) => println!("{ciphertext}"),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(line = lineno + 1, error = %e, "cannot migrate ciphertext");
                    println!("{ciphertext}");
                }
            }
        } else if let Err(e) = encryptor.decrypt(ciphertext) {
            failures += 1;
            tracing::warn!(line = lineno + 1, error = %e, "cannot decrypt ciphertext");
        }
    }

    eprintln!("{:<16} {:>10}", "generation", "decrypts");
    for usage in encryptor.usage() {
        eprintln!(
            "{:<16} {:>10}{}",
            usage.id,
            usage.decrypts,
            if usage.current { "  (current)" } else { "" }
        );
    }
    if migrate {
        eprintln!("migrated: {migrated}");
    }
    if failures > 0 {
        anyhow::bail!("{failures} ciphertext(s) could not be decrypted with any key");
    }
    Ok(())
}

// ── `piiguard pii` ────────────────────────────────────────────────────────────

fn cmd_pii(config: &PiiguardConfig, cache: Arc<DerivedKeyCache>, action: PiiAction) -> Result<()> {
    let (scope, value, encrypt) = match action {
        PiiAction::Encrypt { scope, value } => (scope, value, true),
        PiiAction::Decrypt { scope, value } => (scope, value, false),
    };
    let password = resolve_password(scope.password)?;
    let mut pii = PiiEncryptor::new(&password, scope.salt.as_bytes(), config.pii.cost, cache)
        .with_max_cost(config.pii.max_cost);
    if let Some(context) = scope.context {
        pii = pii.with_context(context);
    }

    let value = read_value(value)?;
    if encrypt {
        println!("{}", pii.encrypt(value.as_bytes())?);
    } else {
        println!("{}", String::from_utf8_lossy(&pii.decrypt(value.trim())?));
    }
    Ok(())
}

// ── `piiguard ecc` ────────────────────────────────────────────────────────────

async fn cmd_ecc(config: &PiiguardConfig, cache: Arc<DerivedKeyCache>, action: EccAction) -> Result<()> {
    let encryptor = EnvelopeEccEncryptor::new(
        LocalKeyVault::from_config(&config.vault, cache),
        Duration::from_millis(config.vault.timeout_ms),
    );

    match action {
        EccAction::Keygen { identity, password } => {
            let password = resolve_password(password)?;
            let pair = generate_keypair();
            let sealed = encryptor
                .vault()
                .encrypt(&pair.private_key, &password, &identity)
                .await
                .context("sealing private key")?;
            println!("public_key: {}", B64.encode(&pair.public_key));
            println!("sealed_key: {sealed}");
        }
        EccAction::Encrypt { public_key, value } => {
            let public_key = B64
                .decode(public_key.trim())
                .context("--public-key is not valid base64")?;
            println!("{}", encryptor.encrypt(read_value(value)?.as_bytes(), &public_key)?);
        }
        EccAction::Decrypt {
            sealed_key,
            identity,
            password,
            value,
        } => {
            let password = resolve_password(password)?;
            let plaintext = encryptor
                .decrypt(read_value(value)?.trim(), &sealed_key, &password, &identity)
                .await?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
    }
    Ok(())
}

// ── `piiguard session` ────────────────────────────────────────────────────────

async fn cmd_session(config: &PiiguardConfig, action: SessionAction) -> Result<()> {
    let sessions = LayeredSessionEncryptor::from_config(&config.session, build_gateway(config)?)
        .context("building session encryptor")?;

    match action {
        SessionAction::Encrypt { value } => {
            println!("{}", sessions.encrypt(read_value(value)?.as_bytes()).await?);
        }
        SessionAction::Decrypt { value } => {
            let plaintext = sessions.decrypt(read_value(value)?.trim()).await?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn build_gateway(config: &PiiguardConfig) -> Result<KmsGateway<LocalKms>> {
    let client = match &config.kms.local_key {
        Some(key) => LocalKms::new(decode_key(key, "kms.local_key")?),
        None => {
            tracing::warn!("kms.local_key not set; s2 ciphertexts will not outlive this process");
            LocalKms::generate()
        }
    };
    Ok(KmsGateway::new(client, &config.kms)?)
}

fn read_value(arg: Option<String>) -> Result<String> {
    match arg {
        Some(v) if v != "-" => Ok(v),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading value from stdin")?;
            Ok(buf.strip_suffix('\n').map(str::to_owned).unwrap_or(buf))
        }
    }
}

fn resolve_password(arg: Option<String>) -> Result<SecretString> {
    let password = match arg {
        Some(p) => p,
        None => rpassword::prompt_password("Password: ").context("reading password")?,
    };
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(SecretString::from(password))
}
