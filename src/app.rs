use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{error, LevelFilter};
use parking_lot::Mutex;

use crate::{
    action::RateActions,
    adapter::{DefaultAdapter, RuleAdapter, SiteAdapter},
    config::Config,
    dom::{NodeId, SharedDom},
    fixture::{OverlayRequest, Page, PageFixture},
    overlay::OverlayAction,
    settings::Settings,
    watcher::Watcher,
};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[arg(
        short,
        long,
        help = "The page fixture to watch, as a .json or .toml file."
    )]
    pub page: PathBuf,

    #[arg(
        short,
        long,
        help = "The path to the config file. The default is `config.toml`."
    )]
    pub config: Option<String>,

    #[arg(
        short,
        long,
        help = "Also attach controllers to audio elements. This overrides the value from the config file."
    )]
    pub audio: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSummary {
    pub label: Option<String>,
    pub media: NodeId,
    pub speed: String,
    pub volume: String,
    pub playback_rate: f64,
    pub hidden: bool,
    pub no_source: bool,
}

impl fmt::Display for ControllerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label}")?,
            None => write!(f, "{}", self.media)?,
        }
        write!(
            f,
            ": speed {} (rate {}), volume {}",
            self.speed, self.playback_rate, self.volume
        )?;
        if self.hidden {
            write!(f, ", hidden")?;
        }
        if self.no_source {
            write!(f, ", no source")?;
        }
        Ok(())
    }
}

pub async fn start() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_env("SPEEDWATCH_LOG")
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli_args(&cli)?;
    let fixture = PageFixture::read_path(&cli.page)?;

    let summaries = run(config, &fixture).await?;
    if summaries.is_empty() {
        println!("No controllers attached");
    }
    for summary in summaries {
        println!("{summary}");
    }
    Ok(())
}

pub async fn run(config: Config, fixture: &PageFixture) -> anyhow::Result<Vec<ControllerSummary>> {
    let Page { dom, mut labels } = fixture.build().context("Failed to build page")?;
    let dom: SharedDom = Arc::new(Mutex::new(dom));

    let settings = Arc::new(Settings::new(config.settings));
    let adapter: Arc<dyn SiteAdapter> = if config.site.is_empty() {
        Arc::new(DefaultAdapter)
    } else {
        Arc::new(RuleAdapter::new(config.site))
    };
    let actions = Arc::new(RateActions::new(Arc::clone(&settings)));
    let mut watcher = Watcher::new(
        Arc::clone(&dom),
        settings,
        adapter,
        actions,
        config.eligibility,
    );

    watcher.start()?;
    watcher.settle().await;

    for (index, step) in fixture.script.iter().enumerate() {
        let request = step
            .apply(&mut dom.lock(), &mut labels)
            .with_context(|| format!("Script step {} failed", index + 1))?;
        if let Some(OverlayRequest { media, action }) = request {
            if let Err(err) = click(&mut watcher, media, action) {
                error!("Overlay action {} on {media} failed: {err:?}", action.name());
            }
        }
        watcher.settle().await;
    }

    let dom = dom.lock();
    let mut summaries: Vec<ControllerSummary> = watcher
        .lifecycle()
        .controllers()
        .map(|state| ControllerSummary {
            label: labels
                .iter()
                .find(|(_, id)| *id == state.media)
                .map(|(label, _)| label.to_string()),
            media: state.media,
            speed: state.displayed_speed.clone(),
            volume: state.displayed_volume.clone(),
            playback_rate: dom.media(state.media).map_or(1.0, |media| media.playback_rate),
            hidden: state.overlay.is_hidden(),
            no_source: state.no_source(),
        })
        .collect();
    summaries.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(summaries)
}

fn click(watcher: &mut Watcher, media: NodeId, action: OverlayAction) -> anyhow::Result<()> {
    let button = watcher
        .lifecycle()
        .get(media)
        .and_then(|state| state.overlay.button(action))
        .ok_or_else(|| anyhow!("Media {media} has no controller"))?;
    watcher.lifecycle_mut().click(button)
}
