use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use podfeed::config::Config;
use podfeed::model::{episode_id, Episode, EpisodeType, Explicit};
use podfeed::storage::media::{place_artwork, place_audio, remove_media};
use podfeed::storage::FeedStore;

#[derive(Parser, Debug)]
#[command(name = "podfeed", about = "Podcast feed store with RSS 2.0 + iTunes output")]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the feed file with default settings if it does not exist
    Init,

    /// Print podcast settings
    Show,

    /// List episodes in feed order
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload an MP3 and add it as an episode
    Add {
        /// Audio file to upload (.mp3)
        #[arg(long, value_name = "FILE")]
        audio: PathBuf,

        #[arg(long)]
        title: String,

        #[arg(long)]
        description: String,

        /// Publication time (RFC 3339); defaults to now
        #[arg(long, value_name = "RFC3339")]
        pub_date: Option<DateTime<Utc>>,

        /// Duration string, e.g. 00:42:10
        #[arg(long)]
        duration: Option<String>,

        /// yes, no or clean
        #[arg(long)]
        explicit: Option<Explicit>,

        #[arg(long)]
        episode_number: Option<u32>,

        #[arg(long)]
        season_number: Option<u32>,

        /// full, trailer or bonus
        #[arg(long)]
        episode_type: Option<EpisodeType>,
    },

    /// Delete an episode and its audio file
    Delete {
        /// Episode id, as shown by `list`
        id: String,
    },

    /// Update podcast settings; omitted options keep their current value
    Settings {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        link: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        subtitle: Option<String>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// yes, no or clean
        #[arg(long)]
        explicit: Option<Explicit>,
        /// Artwork to upload (.jpg, .jpeg or .png)
        #[arg(long, value_name = "FILE")]
        artwork: Option<PathBuf>,
    },

    /// Write the feed with absolute URLs to stdout or a file
    Feed {
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from '{}'", args.config.display()))?;

    let store = FeedStore::load(&config.paths.rss_file, config.base_url.clone())
        .await
        .with_context(|| {
            format!(
                "Failed to open feed at '{}'",
                config.paths.rss_file.display()
            )
        })?;

    match args.command {
        Command::Init => {
            println!("Feed ready at {}", store.path().display());
        }

        Command::Show => {
            let podcast = store.snapshot().await;
            let c = &podcast.channel;
            println!("Title:       {}", c.title);
            println!("Link:        {}", c.link);
            println!("Description: {}", c.description);
            println!("Language:    {}", c.language);
            println!("Published:   {}", c.pub_date.to_rfc2822());
            println!("Author:      {}", c.author);
            println!("Subtitle:    {}", c.subtitle);
            println!("Summary:     {}", c.summary);
            println!("Image:       {}", c.image_url);
            println!(
                "Explicit:    {}",
                c.explicit.map(Explicit::as_str).unwrap_or("-")
            );
            println!("Category:    {}", c.category);
            println!("Episodes:    {}", podcast.episodes.len());
        }

        Command::List { json } => {
            let mut episodes = store.snapshot().await.episodes;
            episodes.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

            if json {
                let out = serde_json::to_string_pretty(&episodes)
                    .context("Failed to serialize episodes")?;
                println!("{out}");
            } else if episodes.is_empty() {
                println!("No episodes.");
            } else {
                for ep in &episodes {
                    println!(
                        "{}  {}  {}",
                        ep.pub_date.format("%Y-%m-%d"),
                        ep.id,
                        ep.title
                    );
                }
            }
        }

        Command::Add {
            audio,
            title,
            description,
            pub_date,
            duration,
            explicit,
            episode_number,
            season_number,
            episode_type,
        } => {
            if title.trim().is_empty() || description.trim().is_empty() {
                anyhow::bail!("Title and description are required");
            }

            let placed = place_audio(
                &audio,
                &config.paths.audio_dir,
                config.upload.max_audio_bytes(),
            )
            .await
            .with_context(|| format!("Failed to upload '{}'", audio.display()))?;

            let pub_date = pub_date.unwrap_or_else(Utc::now);
            let id = episode_id(&title, pub_date);
            let mut episode = Episode::new(
                id.clone(),
                title,
                description,
                pub_date,
                format!("/audio/{}", placed.filename),
                placed.size,
            );
            episode.guid = id.clone();
            episode.audio_type = placed.mime_type.to_string();
            episode.filename = placed.filename.clone();
            episode.uploaded_at = Some(Utc::now());
            episode.duration = duration;
            episode.explicit = explicit;
            episode.episode_number = episode_number;
            episode.season_number = season_number;
            episode.episode_type = episode_type;

            if let Err(e) = store.add_episode(episode).await {
                placed.discard().await;
                return Err(e).context("Failed to add episode");
            }
            println!("Added episode {id}");
        }

        Command::Delete { id } => {
            let removed = store
                .delete_episode(&id)
                .await
                .with_context(|| format!("Failed to delete episode '{id}'"))?;

            if !removed.filename.is_empty() {
                if let Err(e) = remove_media(&config.paths.audio_dir, &removed.filename).await {
                    tracing::warn!(
                        episode = %id,
                        file = %removed.filename,
                        error = %e,
                        "Episode deleted but its audio file could not be removed"
                    );
                }
            }
            println!("Deleted episode {id}");
        }

        Command::Settings {
            title,
            link,
            description,
            language,
            author,
            subtitle,
            summary,
            category,
            explicit,
            artwork,
        } => {
            let mut channel = store.snapshot().await.channel;
            let fields = [
                (&mut channel.title, title),
                (&mut channel.link, link),
                (&mut channel.description, description),
                (&mut channel.language, language),
                (&mut channel.author, author),
                (&mut channel.subtitle, subtitle),
                (&mut channel.summary, summary),
                (&mut channel.category, category),
            ];
            for (field, value) in fields {
                if let Some(value) = value {
                    *field = value;
                }
            }
            if explicit.is_some() {
                channel.explicit = explicit;
            }

            let placed = match &artwork {
                Some(path) => {
                    let placed = place_artwork(
                        path,
                        &config.paths.artwork_dir,
                        config.upload.max_artwork_bytes(),
                    )
                    .await
                    .with_context(|| format!("Failed to upload '{}'", path.display()))?;
                    channel.image_url = format!("/static/artwork/{}", placed.filename);
                    Some(placed)
                }
                None => None,
            };

            if let Err(e) = store.update_podcast(channel).await {
                if let Some(placed) = placed {
                    placed.discard().await;
                }
                return Err(e).context("Failed to update settings");
            }
            println!("Settings updated");
        }

        Command::Feed { output } => {
            let xml = store.serve_xml().await.context("Failed to generate feed")?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &xml)
                        .await
                        .with_context(|| format!("Failed to write '{}'", path.display()))?;
                    println!("Wrote feed to {}", path.display());
                }
                None => {
                    std::io::stdout()
                        .write_all(&xml)
                        .context("Failed to write feed to stdout")?;
                }
            }
        }
    }

    Ok(())
}
