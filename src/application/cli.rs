#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

use std::io;
use std::path;

use anyhow::bail;
use anyhow::Result;
use chrono::TimeZone;
use chrono::Utc;
use clap::builder::PossibleValuesParser;
use clap::value_parser;
use clap::Arg;
use clap::ArgAction;
use clap::Command;
use clap_complete::generate;
use clap_complete::Generator;
use clap_complete::Shell;
use strum::VariantNames;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use yansi::Paint;

use super::repl::help_text;
use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ChatBackend;
use crate::domain::models::Thread;
use crate::infrastructure::backends::BackendManager;

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
    std::process::exit(0);
}

pub fn format_thread(thread: &Thread) -> String {
    let updated = Utc
        .timestamp_millis_opt(thread.updated_at)
        .single()
        .map(|time| {
            return time.format("%Y-%m-%d %H:%M").to_string();
        })
        .unwrap_or_else(|| {
            return "unknown".to_string();
        });

    let mut title = thread.title.split('\n').next().unwrap_or_default().to_string();
    if title.is_empty() {
        title = "(untitled)".to_string();
    }
    if title.chars().count() >= 70 {
        title = format!("{}...", title.chars().take(67).collect::<String>());
    }

    return format!("- (ID: {}) {updated}, {title}", thread.thread_id);
}

async fn print_threads_list() -> Result<()> {
    let limit = Config::get_u64(ConfigKey::ThreadListLimit)? as usize;
    let page = BackendManager::get().list_threads(limit).await?;

    if page.items.is_empty() {
        println!("There are no threads available. You should start your first one!");
    } else {
        let threads = page
            .items
            .iter()
            .map(|thread| {
                return format_thread(thread);
            })
            .collect::<Vec<String>>();
        println!("{}", threads.join("\n"));
    }

    return Ok(());
}

async fn create_thread(title: &str) -> Result<()> {
    let created = BackendManager::get().create_thread(title).await?;
    println!("{}", created.thread_id);

    return Ok(());
}

async fn create_config_file() -> Result<()> {
    let config_file_path_str = Config::default(ConfigKey::ConfigFile);
    let config_file_path = path::PathBuf::from(&config_file_path_str);
    if config_file_path.exists() {
        bail!(format!(
            "Config file already exists at {config_file_path_str}"
        ));
    }

    if let Some(parent) = config_file_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut file = fs::File::create(config_file_path.clone()).await?;
    file.write_all(Config::serialize_default(build()).as_bytes())
        .await?;

    println!("Created default config file at {config_file_path_str}");
    return Ok(());
}

fn subcommand_completions() -> Command {
    return Command::new("completions")
        .about("Generates shell completions.")
        .arg(
            clap::Arg::new("shell")
                .short('s')
                .long("shell")
                .help("Which shell to generate completions for.")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Shell))
                .required(true),
        );
}

fn subcommand_config() -> Command {
    return Command::new("config")
        .about("Configuration file options.")
        .subcommand(
            Command::new("create").about("Saves the default config file to the configuration file path. This command will fail if the file exists already.")
        )
        .subcommand(
            Command::new("default").about("Outputs the default configuration file to stdout.")
        )
        .subcommand(
            Command::new("path").about("Returns the default path for the configuration file.")
        );
}

fn subcommand_debug() -> Command {
    return Command::new("debug")
        .about("Debug helpers for Parley")
        .hide(true)
        .subcommand(
            Command::new("log-path").about("Output path to debug log file generated when running Parley with environment variable RUST_LOG=parley")
        )
        .subcommand(
            Command::new("enum-config").about("List all config keys as strings.")
        );
}

fn arg_thread_id() -> Arg {
    return Arg::new(ConfigKey::ThreadId.to_string())
        .short('i')
        .long(ConfigKey::ThreadId.to_string())
        .env("PARLEY_THREAD_ID")
        .num_args(1)
        .help("Thread to open when the chat starts. Lists available threads if not set.");
}

fn subcommand_chat() -> Command {
    return Command::new("chat")
        .about("Start chatting in a thread.")
        .arg(arg_thread_id());
}

fn subcommand_threads() -> Command {
    return Command::new("threads")
        .about("Manage chat threads on the backend.")
        .arg_required_else_help(true)
        .subcommand(Command::new("list").about("List threads with their ids and titles."))
        .subcommand(
            Command::new("create")
                .about("Create a new thread and print its ID.")
                .arg(
                    clap::Arg::new("title")
                        .short('t')
                        .long("title")
                        .help("Thread title")
                        .num_args(1)
                        .default_value("New chat"),
                ),
        );
}

fn arg_global(key: ConfigKey, env: &'static str, help: String) -> Arg {
    return Arg::new(key.to_string())
        .long(key.to_string())
        .env(env)
        .num_args(1)
        .help(help)
        .global(true);
}

pub fn build() -> Command {
    let commands_text = help_text()
        .split('\n')
        .map(|line| {
            if line.starts_with('-') {
                return format!("  {line}");
            }
            if line.starts_with("COMMANDS:") {
                return Paint::new(format!("CHAT {line}"))
                    .underline()
                    .bold()
                    .to_string();
            }
            return line.to_string();
        })
        .collect::<Vec<String>>()
        .join("\n");

    let about = format!(
        "{}\n\nVersion: {}\nCommit: {}",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION"),
        env!("VERGEN_GIT_DESCRIBE")
    );

    return Command::new("parley")
        .about(about)
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .after_help(commands_text)
        .arg_required_else_help(false)
        .subcommand(subcommand_chat())
        .subcommand(subcommand_completions())
        .subcommand(subcommand_config())
        .subcommand(subcommand_debug())
        .subcommand(subcommand_threads())
        .arg(arg_thread_id())
        .arg(
            Arg::new(ConfigKey::ConfigFile.to_string())
                .short('c')
                .long(ConfigKey::ConfigFile.to_string())
                .env("PARLEY_CONFIG_FILE")
                .num_args(1)
                .help(format!("Path to configuration file [default: {}]", Config::default(ConfigKey::ConfigFile)))
                .global(true)
        )
        .arg(arg_global(
            ConfigKey::ApiUrl,
            "PARLEY_API_URL",
            "Base URL of the chat backend API.".to_string(),
        ))
        .arg(arg_global(
            ConfigKey::AccessToken,
            "PARLEY_ACCESS_TOKEN",
            "Bearer token used to list, create, and read threads.".to_string(),
        ))
        .arg(arg_global(
            ConfigKey::IdentityToken,
            "PARLEY_IDENTITY_TOKEN",
            "Bearer token used for the streaming chat endpoint.".to_string(),
        ))
        .arg(
            arg_global(
                ConfigKey::WebSearch,
                "PARLEY_WEB_SEARCH",
                format!("Allow the backend to search the web while answering. [default: {}]", Config::default(ConfigKey::WebSearch)),
            )
            .value_parser(PossibleValuesParser::new(["true", "false"])),
        )
        .arg(arg_global(
            ConfigKey::FirstByteTimeout,
            "PARLEY_FIRST_BYTE_TIMEOUT",
            format!("Milliseconds to wait for the first byte of a reply before giving up. [default: {}]", Config::default(ConfigKey::FirstByteTimeout)),
        ))
        .arg(arg_global(
            ConfigKey::ProgressTimeout,
            "PARLEY_PROGRESS_TIMEOUT",
            format!("Milliseconds a reply may stall before falling back to polling. [default: {}]", Config::default(ConfigKey::ProgressTimeout)),
        ))
        .arg(arg_global(
            ConfigKey::PollInterval,
            "PARLEY_POLL_INTERVAL",
            format!("Milliseconds between thread reads while polling for an answer. [default: {}]", Config::default(ConfigKey::PollInterval)),
        ))
        .arg(arg_global(
            ConfigKey::PollDeadline,
            "PARLEY_POLL_DEADLINE",
            format!("Milliseconds to keep polling for an answer before giving up. [default: {}]", Config::default(ConfigKey::PollDeadline)),
        ))
        .arg(arg_global(
            ConfigKey::ThreadListLimit,
            "PARLEY_THREAD_LIST_LIMIT",
            format!("Number of threads to fetch when listing. [default: {}]", Config::default(ConfigKey::ThreadListLimit)),
        ));
}

pub async fn parse() -> Result<bool> {
    let matches = build().get_matches();

    match matches.subcommand() {
        Some(("debug", debug_matches)) => {
            match debug_matches.subcommand() {
                Some(("log-path", _)) => {
                    let log_path = dirs::cache_dir()
                        .unwrap_or_else(std::env::temp_dir)
                        .join("parley/debug.log");
                    println!("{}", log_path.to_string_lossy());
                }
                Some(("enum-config", _)) => {
                    let res = ConfigKey::VARIANTS.join("\n");
                    println!("{}", res);
                }
                _ => {
                    subcommand_debug().print_long_help()?;
                }
            }

            return Ok(false);
        }
        Some(("chat", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
        }
        Some(("completions", subcmd_matches)) => {
            if let Some(completions) = subcmd_matches.get_one::<Shell>("shell").copied() {
                let mut app = build();
                print_completions(completions, &mut app);
            }
        }
        Some(("config", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("create", _)) => {
                create_config_file().await?;
                return Ok(false);
            }
            Some(("default", _)) => {
                println!("{}", Config::serialize_default(build()));
                return Ok(false);
            }
            Some(("path", _)) => {
                println!("{}", Config::default(ConfigKey::ConfigFile));
                return Ok(false);
            }
            _ => {
                subcommand_config().print_long_help()?;
                return Ok(false);
            }
        },
        Some(("threads", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("list", list_matches)) => {
                Config::load(build(), vec![&matches, subcmd_matches, list_matches]).await?;
                print_threads_list().await?;
                return Ok(false);
            }
            Some(("create", create_matches)) => {
                Config::load(build(), vec![&matches, subcmd_matches, create_matches]).await?;
                let title = create_matches
                    .get_one::<String>("title")
                    .map(|title| return title.to_string())
                    .unwrap_or_default();
                create_thread(&title).await?;
                return Ok(false);
            }
            _ => {
                subcommand_threads().print_long_help()?;
                return Ok(false);
            }
        },
        _ => {
            Config::load(build(), vec![&matches]).await?;
        }
    }

    return Ok(true);
}
