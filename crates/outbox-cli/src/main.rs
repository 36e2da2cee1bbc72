mod cli;
mod config;
mod prompt;
mod storage;

use std::{fs, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    eyre::{bail, eyre, WrapErr},
    Result,
};
use outbox_client::EmailClient;
use outbox_core::{
    Attachment, Backend, GoogleConfig, KeyPolicy, Message, MicrosoftConfig, ProviderConfig,
    SecretString,
};
use outbox_storage::{AppPaths, KeyringProvider};
use outbox_transport::{DispatcherSettings, TransportDispatcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    cli::{Command, ConfigCommand, MessageArgs},
    config::Settings,
    prompt::{CachedPassphrase, StderrPrompt, TerminalPassphrase},
};

type Client = EmailClient<KeyringProvider>;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let settings = config::load(cli.settings.as_deref())?;
    let paths = storage::resolve_paths(&settings, cli.profile.as_deref())?;

    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    match cli.command {
        Command::Config(ConfigCommand::Init) => init_settings(cli.settings.as_deref()),
        Command::DryRun(args) => {
            let client = build_client(&settings, &paths, cancel)?.with_backend(Backend::DryRun);
            let result = client.send(build_message(&args)?).await?;
            match result.location {
                Some(path) => println!("Dry run written to {}", path.display()),
                None => println!("Dry run complete"),
            }
            Ok(())
        }
        Command::Send {
            backend,
            non_interactive,
            message,
        } => {
            let backend = select_backend(backend, &settings)?;
            let client = build_client(&settings, &paths, cancel)?
                .with_backend(backend)
                .with_interactive(!non_interactive);
            let result = client.send(build_message(&message)?).await?;
            match result.message_id {
                Some(id) => println!("Sent via {backend} ({id})"),
                None => println!("Sent via {backend}"),
            }
            Ok(())
        }
        Command::Auth { backend } => {
            let backend = select_backend(backend, &settings)?;
            let client = build_client(&settings, &paths, cancel)?.with_backend(backend);
            match client.device_code().await? {
                Some(token) => println!(
                    "Signed in for {backend}; token valid until {}",
                    token.expires_at.to_rfc3339()
                ),
                None => println!("{backend} does not need a sign-in"),
            }
            Ok(())
        }
        Command::Rekey { to } => {
            let mut client = build_client(&settings, &paths, cancel)?;
            let policy = KeyPolicy::from(to);
            client.rekey(policy, Some(&TerminalPassphrase::fresh())).await?;
            println!(
                "Configuration re-encrypted. Set key_policy in the settings file to keep using it:\n\n[key_policy]\nprefer_keyring = {}\nallow_passphrase_fallback = {}",
                policy.prefer_keyring, policy.allow_passphrase_fallback
            );
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let client = build_client(&settings, &paths, cancel)?;
            show_config(&client, &paths).await
        }
        Command::Config(ConfigCommand::Microsoft {
            email,
            client_id,
            authority,
        }) => {
            let client_id = client_id
                .or_else(|| settings.microsoft.as_ref().map(|m| m.client_id.clone()))
                .ok_or_else(|| eyre!("no Microsoft client id: pass --client-id or set [microsoft] in settings"))?;
            let mut account = MicrosoftConfig::new(email, client_id);
            if let Some(authority) =
                authority.or_else(|| settings.microsoft.as_ref().and_then(|m| m.authority.clone()))
            {
                account.authority = authority;
            }
            let client = build_client(&settings, &paths, cancel)?;
            client.configure(ProviderConfig::Microsoft(account)).await?;
            println!("Microsoft account saved to profile {}", paths.profile);
            Ok(())
        }
        Command::Config(ConfigCommand::Google {
            email,
            client_id,
            with_secret,
        }) => {
            let client_id = client_id
                .or_else(|| settings.google.as_ref().map(|g| g.client_id.clone()))
                .ok_or_else(|| eyre!("no Google client id: pass --client-id or set [google] in settings"))?;
            let mut account = GoogleConfig::new(email, client_id);
            if with_secret {
                let secret = rpassword::prompt_password("Google client secret: ")
                    .wrap_err("could not read the client secret")?;
                account.client_secret = Some(SecretString::new(secret));
            }
            let client = build_client(&settings, &paths, cancel)?;
            client.configure(ProviderConfig::Google(account)).await?;
            println!("Google account saved to profile {}", paths.profile);
            Ok(())
        }
        Command::Config(ConfigCommand::Remove { provider }) => {
            let client = build_client(&settings, &paths, cancel)?;
            if client.remove_provider(provider).await? {
                println!("Removed {provider} from profile {}", paths.profile);
            } else {
                println!("{provider} was not configured");
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// First Ctrl-C cancels an in-flight device sign-in; a second one exits.
fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            debug!(error = %err, "ctrl-c handler unavailable");
            return;
        }
        warn!("interrupt received, cancelling");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn init_settings(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_path()?,
    };
    let written = config::write_if_missing(&Settings::default(), &path)?;
    println!("Settings at {}", written.display());
    Ok(())
}

fn build_client(
    settings: &Settings,
    paths: &AppPaths,
    cancel: CancellationToken,
) -> Result<Client> {
    let policy = storage::key_policy(settings)?;
    let store = storage::production_store(
        paths,
        Arc::new(CachedPassphrase::new(TerminalPassphrase::default())),
    );

    let mut dispatch = DispatcherSettings::new(storage::dry_run_dir(settings, paths));
    dispatch.smtp = settings.smtp.clone();

    let mut client = EmailClient::new(store, policy, TransportDispatcher::new(dispatch))
        .with_prompt(Arc::new(StderrPrompt))
        .with_cancellation(cancel);
    if let Some(provider) = settings.smtp_provider {
        client = client.with_smtp_provider(provider);
    }
    Ok(client)
}

fn select_backend(flag: Option<Backend>, settings: &Settings) -> Result<Backend> {
    match flag.or(settings.backend) {
        Some(backend) => Ok(backend),
        None => bail!("no backend selected: pass --backend or set `backend` in the settings file"),
    }
}

async fn show_config(client: &Client, paths: &AppPaths) -> Result<()> {
    let policy = client.policy();
    println!("profile:     {}", paths.profile);
    println!("config file: {}", paths.encrypted_config_path().display());
    println!("dry runs:    {}", paths.dry_run_dir().display());
    println!(
        "key policy:  keyring={} passphrase={}",
        policy.prefer_keyring, policy.allow_passphrase_fallback
    );

    if !paths.encrypted_config_path().exists() {
        println!("accounts:    none");
        return Ok(());
    }
    let document = client.load_config().await?;
    if document.is_empty() {
        println!("accounts:    none");
    }
    for provider in document.providers() {
        let signed_in = match provider.token() {
            Some(token) if token.is_valid() => "signed in",
            Some(_) => "token expired",
            None => "not signed in",
        };
        println!(
            "account:     {} <{}> ({signed_in})",
            provider.kind(),
            provider.email_address()
        );
    }
    Ok(())
}

fn build_message(args: &MessageArgs) -> Result<Message> {
    let mut message = Message::new(args.subject.clone());
    if let Some(from) = &args.from {
        message = message.sender(from.clone());
    }
    for address in &args.to {
        message = message.to(address.clone());
    }
    for address in &args.cc {
        message = message.cc(address.clone());
    }
    for address in &args.bcc {
        message = message.bcc(address.clone());
    }
    if let Some(text) = &args.text {
        message = message.text(text.clone());
    }
    if let Some(html) = &args.html {
        message = message.html(html.clone());
    }
    for path in &args.attachments {
        message = message.attach(read_attachment(path)?);
    }
    Ok(message)
}

fn read_attachment(path: &Path) -> Result<Attachment> {
    let data = fs::read(path).wrap_err_with(|| format!("reading attachment {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| eyre!("attachment path has no file name: {}", path.display()))?;
    Ok(Attachment::new(filename, content_type_for(path), data))
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "htm" | "html" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ics" => "text/calendar",
        _ => "application/octet-stream",
    }
}
