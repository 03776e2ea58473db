//! One-shot render-host entry: parse the invocation, run the pipeline, map the
//! outcome to an exit status.

mod timing;

pub use timing::StageTiming;

use crate::compose::SceneComposer;
use crate::config::{ArgumentEncoding, ComposerConfig, ConfigError};
use crate::error::ComposeError;
use crate::render::RenderResult;
use crate::request::SceneSpecification;
use crate::scene::SceneContext;
use std::error::Error;
use std::path::PathBuf;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

pub const USAGE: &str = "\
usage: roomstage [--background] [--config <file>] [--positional | --json]
                 [--focal-length <mm>] [--light-energy <W>] -- <request...>

The request after `--` is one JSON object (default) or, with --positional,
nine arguments: obj_angles obj_scale obj_offsets camera_angles
camera_location resolution_x resolution_y obj_path render_path.";

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("option {0} needs a value")]
    MissingValue(&'static str),
    #[error("option {flag} expects a number, got '{value}'")]
    InvalidNumber { flag: &'static str, value: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Options before `--` and the raw request after it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub background: bool,
    pub help: bool,
    pub config_path: Option<PathBuf>,
    pub encoding: Option<ArgumentEncoding>,
    pub focal_length: Option<f32>,
    pub light_energy: Option<f32>,
    pub request: Vec<String>,
}

impl Invocation {
    pub fn parse<I>(args: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut invocation = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--" => {
                    invocation.request = args.by_ref().collect();
                    break;
                }
                "-b" | "--background" => invocation.background = true,
                "-h" | "--help" => invocation.help = true,
                "--positional" => invocation.encoding = Some(ArgumentEncoding::Positional),
                "--json" => invocation.encoding = Some(ArgumentEncoding::JsonBlob),
                "--config" => {
                    let path = args.next().ok_or(UsageError::MissingValue("--config"))?;
                    invocation.config_path = Some(PathBuf::from(path));
                }
                "--focal-length" => {
                    invocation.focal_length = Some(number("--focal-length", args.next())?);
                }
                "--light-energy" => {
                    invocation.light_energy = Some(number("--light-energy", args.next())?);
                }
                _ => return Err(UsageError::UnknownOption(arg)),
            }
        }
        Ok(invocation)
    }

    /// Defaults, then the config file, then this invocation's flags.
    pub fn config(&self) -> Result<ComposerConfig, UsageError> {
        let mut config = ComposerConfig::load(self.config_path.as_deref())?;
        if let Some(encoding) = self.encoding {
            config.argument_encoding = encoding;
        }
        if let Some(focal_length) = self.focal_length {
            config.focal_length = focal_length;
        }
        if let Some(light_energy) = self.light_energy {
            config.light_energy = light_energy;
        }
        Ok(config)
    }
}

fn number(flag: &'static str, value: Option<String>) -> Result<f32, UsageError> {
    let value = value.ok_or(UsageError::MissingValue(flag))?;
    value
        .parse()
        .map_err(|_| UsageError::InvalidNumber { flag, value })
}

/// Runs one request and returns the process exit status.
pub fn run(args: Vec<String>) -> i32 {
    let invocation = match Invocation::parse(args) {
        Ok(invocation) => invocation,
        Err(err) => {
            log::error!("{}", err);
            eprintln!("{USAGE}");
            return EXIT_USAGE;
        }
    };
    if invocation.help {
        println!("{USAGE}");
        return EXIT_SUCCESS;
    }
    if !invocation.background {
        log::debug!("No --background flag; running headless regardless");
    }

    let config = match invocation.config() {
        Ok(config) => config,
        Err(err) => {
            log::error!("{}", err);
            return EXIT_USAGE;
        }
    };
    let spec = match SceneSpecification::decode(config.argument_encoding, &invocation.request) {
        Ok(spec) => spec,
        Err(err) => {
            log::error!("Cannot decode request: {}", err);
            return EXIT_USAGE;
        }
    };
    log::info!(
        "Request: {} object(s), {}x{} -> {}",
        spec.objects.len(),
        spec.resolution_x,
        spec.resolution_y,
        spec.render_path.display()
    );

    let composer = SceneComposer::new(config);
    let mut timing = StageTiming::new();
    match execute(&composer, &spec, &mut timing) {
        Ok(result) => {
            let (width, height) = result.dimensions();
            log::info!(
                "Rendered {} ({}x{}, sha256 {})",
                result.path.display(),
                width,
                height,
                result.digest
            );
            log::info!("Stages: {}", timing.summary());
            EXIT_SUCCESS
        }
        Err(err) => {
            if err.is_validation() {
                log::error!("Request rejected: {}", err);
            } else {
                log::error!("Request failed: {}", err);
            }
            let mut source = err.source();
            while let Some(cause) = source {
                log::error!("  caused by: {}", cause);
                source = cause.source();
            }
            EXIT_FAILURE
        }
    }
}

fn execute(
    composer: &SceneComposer,
    spec: &SceneSpecification,
    timing: &mut StageTiming,
) -> Result<RenderResult, ComposeError> {
    composer.run(&mut SceneContext::new(), spec, timing)
}
