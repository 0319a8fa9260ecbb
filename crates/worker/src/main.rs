use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kolscope_core::analysis::{prompt, Analyzer};
use kolscope_core::llm::gemini::GeminiClient;

mod backfill;

#[derive(Debug, Parser)]
#[command(name = "kolscope_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one text and print the result as JSON.
    Analyze {
        /// Read the text from this file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Print the model prompt and exit without calling the model.
        #[arg(long)]
        print_prompt: bool,

        /// Also store the text and its analysis as a draft post owned by this user.
        #[arg(long)]
        save_draft_for: Option<uuid::Uuid>,
    },

    /// Analyze draft posts that have no stored analysis yet.
    Backfill {
        /// Maximum number of drafts to process in this run.
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// List candidate drafts without calling the model or writing.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = kolscope_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = match args.command {
        Command::Analyze {
            file,
            print_prompt,
            save_draft_for,
        } => run_analyze(&settings, file, print_prompt, save_draft_for).await,
        Command::Backfill { limit, dry_run } => {
            let opts = backfill::BackfillOptions { limit, dry_run };
            backfill::run(&settings, opts).await.map(|summary| {
                tracing::info!(?summary, "backfill finished");
            })
        }
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
    }
    res
}

async fn run_analyze(
    settings: &kolscope_core::config::Settings,
    file: Option<PathBuf>,
    print_prompt: bool,
    save_draft_for: Option<uuid::Uuid>,
) -> anyhow::Result<()> {
    let text = read_input(file.as_ref()).await?;

    if print_prompt {
        println!("{}", prompt::build_prompt(&text));
        return Ok(());
    }

    let analyzer = Analyzer::new(GeminiClient::from_settings(settings)?);
    let result = analyzer.analyze_text(&text).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("failed to serialize analysis result")?
    );

    if let Some(user_id) = save_draft_for {
        let pool = connect(settings).await?;
        let post_id =
            kolscope_core::storage::posts::insert_draft(&pool, user_id, &text, Some(&result))
                .await?;
        tracing::info!(%post_id, %user_id, "saved analysis as draft");
    }

    Ok(())
}

async fn read_input(file: Option<&PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

async fn connect(settings: &kolscope_core::config::Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

fn init_sentry(settings: &kolscope_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backfill_flags() {
        let args = Args::try_parse_from(["kolscope_worker", "backfill", "--limit", "5", "--dry-run"])
            .unwrap();
        match args.command {
            Command::Backfill { limit, dry_run } => {
                assert_eq!(limit, 5);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn analyze_defaults_to_stdin() {
        let args = Args::try_parse_from(["kolscope_worker", "analyze"]).unwrap();
        match args.command {
            Command::Analyze {
                file,
                print_prompt,
                save_draft_for,
            } => {
                assert!(file.is_none());
                assert!(!print_prompt);
                assert!(save_draft_for.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_draft_owner() {
        let res = Args::try_parse_from(["kolscope_worker", "analyze", "--save-draft-for", "nope"]);
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn reads_input_from_file() {
        let path = std::env::temp_dir().join(format!("kolscope-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "TSLA 看漲").await.unwrap();

        let text = read_input(Some(&path)).await.unwrap();
        assert_eq!(text, "TSLA 看漲");

        let _ = tokio::fs::remove_file(&path).await;
    }
}
