use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use frameloop::{DecodeService, FrameDecodeLoop, PixelFormat, Source, SyntheticService};
use tokio::{signal, time};
use tracing::{debug, info};

use crate::config::WallConfig;
use crate::wall::Wall;

#[derive(Parser, Debug)]
#[command(name = "framewall")]
#[command(about = "Decode one source into a grid of independent players")]
pub struct Args {
    /// Media file, URL, or testsrc:// pattern (overrides the config file)
    pub source: Option<String>,

    /// Number of players
    #[arg(short, long)]
    pub players: Option<usize>,

    /// Players per grid row
    #[arg(short, long)]
    pub columns: Option<usize>,

    /// Restart each player when its source ends
    #[arg(long = "loop")]
    pub looping: bool,

    /// Display pixel format (rgba, bgra, rgb24, bgr24)
    #[arg(long)]
    pub format: Option<PixelFormat>,

    /// Minimum time between frames of one player, in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Consecutive frame failures before giving up (0 never gives up)
    #[arg(long)]
    pub max_skips: Option<u32>,

    /// Config file (default: <config dir>/framewall/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write a PNG of every player's last frame here on exit
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// How often the grid is polled, in milliseconds
    #[arg(long)]
    pub refresh_ms: Option<u64>,
}

impl Args {
    /**
        Load the config file and apply command line overrides on top.
    */
    pub fn resolve(&self) -> Result<(WallConfig, String)> {
        let mut config = WallConfig::load(self.config.as_deref())?;

        if let Some(players) = self.players {
            config.players = players;
        }
        if let Some(columns) = self.columns {
            config.columns = columns;
        }
        if self.looping {
            config.looping = true;
        }
        if let Some(format) = self.format {
            config.decode.target_format = format;
        }
        if let Some(interval) = self.interval_ms {
            config.decode.min_frame_interval_ms = interval;
        }
        if let Some(skips) = self.max_skips {
            config.decode.max_consecutive_skips = (skips > 0).then_some(skips);
        }
        if let Some(refresh) = self.refresh_ms {
            config.refresh_ms = refresh;
        }
        config.validate().context("invalid settings")?;

        let source = config.resolve_source(self.source.as_deref())?;
        Ok((config, source))
    }

    pub async fn run(self) -> Result<()> {
        let (config, source) = self.resolve()?;
        info!(%source, players = config.players, format = %config.decode.target_format, "starting");

        if SyntheticService::handles(&Source::from(source.as_str())) {
            let decode_loop = FrameDecodeLoop::new(SyntheticService::new(), config.decode.clone());
            return self.run_wall(decode_loop, &config, &source).await;
        }
        self.run_media(&config, &source).await
    }

    #[cfg(feature = "ffmpeg")]
    async fn run_media(&self, config: &WallConfig, source: &str) -> Result<()> {
        let service = frameloop::FfmpegService::new().context("cannot initialise FFmpeg")?;
        let decode_loop = FrameDecodeLoop::new(service, config.decode.clone());
        self.run_wall(decode_loop, config, source).await
    }

    #[cfg(not(feature = "ffmpeg"))]
    async fn run_media(&self, _config: &WallConfig, source: &str) -> Result<()> {
        anyhow::bail!(
            "cannot play '{source}': built without the `ffmpeg` feature (only testsrc:// sources are available)"
        )
    }

    async fn run_wall<S: DecodeService>(
        &self,
        decode_loop: FrameDecodeLoop<S>,
        config: &WallConfig,
        source: &str,
    ) -> Result<()> {
        let mut wall = Wall::start(decode_loop, source, config.players, config.columns, config.looping)?;

        let mut ticker = time::interval(Duration::from_millis(config.refresh_ms));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        let limit = self.duration.map(Duration::from_secs);
        let deadline = async {
            match limit {
                Some(limit) => time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    result?;
                    info!("interrupted");
                    break;
                }
                _ = &mut deadline => {
                    info!("duration reached");
                    break;
                }
                _ = ticker.tick() => {
                    let status = wall.poll();
                    for row in wall.rows() {
                        debug!("{row}");
                    }
                    if status.is_idle() {
                        info!(?status, "all players finished");
                        break;
                    }
                }
            }
        }

        let wall = tokio::task::spawn_blocking(move || {
            wall.stop();
            wall
        })
        .await?;

        for row in wall.rows() {
            info!("{row}");
        }
        for player in wall.players() {
            let snapshot = player.slot().snapshot();
            debug!(session = %player.id(), state = ?snapshot.state, frames = snapshot.generation, "player summary");
        }
        if let Some(dir) = &self.snapshot_dir {
            let saved = wall.save_snapshots(dir)?;
            info!(saved, dir = %dir.display(), "snapshots written");
        }
        Ok(())
    }
}
