use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::config::{PipelineConfig, SynthesisPreference};
use crate::utils::ffmpeg::{find_ffmpeg, ffmpeg_runs};

use super::ffmpeg::FfmpegBackend;
use super::http::HttpDelegate;
use super::local::LocalSynthesizer;
use super::remote::RemoteSynthesizer;
use super::{SynthesisStrategy, UnavailableStrategy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyChoice {
    Local { ffmpeg: PathBuf },
    Remote { endpoint: String },
    Unavailable { reason: String },
}

/// Pure selection rule: preference first, then what the runtime offers.
pub fn choose_strategy(
    preference: SynthesisPreference,
    ffmpeg: Option<PathBuf>,
    endpoint: Option<&str>,
) -> StrategyChoice {
    let endpoint = endpoint.map(str::trim).filter(|e| !e.is_empty());
    let local = |ffmpeg: Option<PathBuf>| match ffmpeg {
        Some(ffmpeg) => StrategyChoice::Local { ffmpeg },
        None => StrategyChoice::Unavailable {
            reason: "no working ffmpeg found for local encoding".into(),
        },
    };
    let remote = |endpoint: Option<&str>| match endpoint {
        Some(endpoint) => StrategyChoice::Remote {
            endpoint: endpoint.to_string(),
        },
        None => StrategyChoice::Unavailable {
            reason: "no remote encoding endpoint configured".into(),
        },
    };

    match preference {
        SynthesisPreference::Disabled => StrategyChoice::Unavailable {
            reason: "video synthesis is disabled".into(),
        },
        SynthesisPreference::Local => local(ffmpeg),
        SynthesisPreference::Remote => remote(endpoint),
        SynthesisPreference::Auto => match (ffmpeg, endpoint) {
            (Some(ffmpeg), _) => StrategyChoice::Local { ffmpeg },
            (None, Some(endpoint)) => StrategyChoice::Remote {
                endpoint: endpoint.to_string(),
            },
            (None, None) => StrategyChoice::Unavailable {
                reason: "no local encoder and no remote endpoint available".into(),
            },
        },
    }
}

/// Decides once, at startup, which synthesis strategy this runtime uses.
pub async fn probe_strategy(
    config: &PipelineConfig,
    output_dir: &Path,
) -> (StrategyChoice, Arc<dyn SynthesisStrategy>) {
    let ffmpeg = match find_ffmpeg(config.ffmpeg_path.as_deref()) {
        Some(path) if ffmpeg_runs(&path).await => Some(path),
        Some(path) => {
            warn!("ffmpeg at {} does not run; ignoring it", path.display());
            None
        }
        None => None,
    };

    let choice = choose_strategy(config.synthesis, ffmpeg, config.remote.endpoint.as_deref());
    let strategy = build_strategy(&choice, config, output_dir);
    info!("Synthesis strategy: {} ({:?})", strategy.name(), choice);
    (choice, strategy)
}

fn build_strategy(
    choice: &StrategyChoice,
    config: &PipelineConfig,
    output_dir: &Path,
) -> Arc<dyn SynthesisStrategy> {
    match choice {
        StrategyChoice::Local { ffmpeg } => Arc::new(LocalSynthesizer::new(
            Arc::new(FfmpegBackend::new(ffmpeg.clone())),
            config.output_width,
            config.output_height,
            config.pacing,
            output_dir.to_path_buf(),
        )),
        StrategyChoice::Remote { endpoint } => match HttpDelegate::new(endpoint, &config.remote) {
            Ok(delegate) => Arc::new(RemoteSynthesizer::new(
                Arc::new(delegate),
                config.remote.clone(),
            )),
            Err(err) => Arc::new(UnavailableStrategy::new(format!(
                "failed to build HTTP client: {err}"
            ))),
        },
        StrategyChoice::Unavailable { reason } => {
            Arc::new(UnavailableStrategy::new(reason.clone()))
        }
    }
}
