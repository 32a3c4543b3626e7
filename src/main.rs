use std::path::{Path, PathBuf};
use structopt::StructOpt;
use log::*;
use mimalloc::MiMalloc;
use std::process::exit;
use std::fmt::Display;
use crate::builder::{Outcome, Packager};
use crate::checkout::Checkout;
use crate::driver::GnNinja;
use crate::settings::{LibraryType, ProjectSettings};
use crate::types::*;

mod archive;
mod builder;
mod checkout;
mod driver;
mod env;
mod error;
mod export;
mod git;
mod settings;
mod types;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(StructOpt, Debug)]
struct Matrix {
    #[structopt(long = "platform", case_insensitive = true,
        possible_values = &["Windows", "Linux", "Android"], help = "target platforms (default: all)")]
    platforms: Vec<Platform>,
    #[structopt(long = "arch", case_insensitive = true,
        possible_values = &["x64", "Arm64"], help = "target architectures (default: all)")]
    archs: Vec<Arch>,
    #[structopt(long = "config", case_insensitive = true,
        possible_values = &["Debug", "Release"], help = "target configurations (default: all)")]
    configs: Vec<BuildConfig>,
    #[structopt(long, case_insensitive = true,
        possible_values = &["shared", "static", "monolithic"], help = "overrides the settings file")]
    library_type: Option<LibraryType>,
    #[structopt(long, help = "JSON file with project settings", env = "V8_PACKAGER_SETTINGS")]
    settings: Option<PathBuf>,
}

impl Matrix {
    fn requests(&self) -> Vec<BuildRequest> {
        fn or_all<T: Copy>(chosen: &[T], all: &[T]) -> Vec<T> {
            if chosen.is_empty() { all.to_vec() } else { chosen.to_vec() }
        }
        BuildRequest::matrix(
            &or_all(&self.platforms, &Platform::ALL),
            &or_all(&self.archs, &Arch::ALL),
            &or_all(&self.configs, &BuildConfig::ALL),
        )
    }

    fn project_settings(&self) -> ProjectSettings {
        match &self.settings {
            Some(path) => ProjectSettings::load(path, self.library_type)
                .unwrap_or_else(|e| failed_fast(e)),
            None => ProjectSettings::new(self.library_type.unwrap_or_default()),
        }
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "v8-packager")]
enum Opt {
    #[structopt(about = "fetch V8 and apply local patches")]
    Fetch {
        #[structopt(long = "v8-version", help = "V8 major.minor to fetch", default_value = "11.1")]
        version: Version,
        #[structopt(long, help = "working root", env = "V8_PACKAGER_ROOT", default_value = ".")]
        root: PathBuf,
    },
    #[structopt(about = "build V8 for the requested platforms, architectures and configurations")]
    Build {
        #[structopt(flatten)]
        matrix: Matrix,
        #[structopt(short, long, help = "output directory", default_value = "dist")]
        out: PathBuf,
        #[structopt(long, help = "build independent requests concurrently; each \
            <platform>/<arch> toolchain is provisioned once, serially, before the builds start")]
        parallel: bool,
        #[structopt(long, help = "working root", env = "V8_PACKAGER_ROOT", default_value = ".")]
        root: PathBuf,
    },
    #[structopt(about = "pack every <platform>/<arch> of the output directory")]
    Archive {
        #[structopt(short, long, help = "output directory", default_value = "dist")]
        out: PathBuf,
        #[structopt(short, long, help = "archive directory", default_value = "archive")]
        archive_dir: PathBuf,
        #[structopt(long, help = "working root", env = "V8_PACKAGER_ROOT", default_value = ".")]
        root: PathBuf,
    },
    #[structopt(about = "print the resolved build matrix as JSON")]
    Plan {
        #[structopt(flatten)]
        matrix: Matrix,
    },
}

impl Opt {
    fn get_root(&self) -> Option<&PathBuf> {
        use Opt::*;
        match self {
            Fetch { root, .. } => Some(root),
            Build { root, .. } => Some(root),
            Archive { root, .. } => Some(root),
            Plan { .. } => None,
        }
    }
}

fn failed_fast<T: Display>(msg: T) -> ! {
    error!("{}", msg);
    exit(1)
}

fn open_checkout(root: &Path) -> Checkout {
    let checkout = Checkout::open(root).unwrap_or_else(|e| failed_fast(e));
    info!("successfully loaded V8 v{} from {:?}", checkout.version, checkout.v8_dir());
    checkout
}

fn main() {
    use Opt::*;
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    let opt: Opt = Opt::from_args();

    // V8's helper scripts need python3
    if !driver::probe(env::PYTHON) {
        failed_fast(format!("{} does not exist on your system.", env::PYTHON));
    }
    let root = opt.get_root().cloned().unwrap_or_default();

    match opt {
        Fetch { version, .. } => {
            let checkout = Checkout::initialize(&root, &version)
                .unwrap_or_else(|e| failed_fast(e));
            checkout.apply_patches().unwrap_or_else(|e| failed_fast(e));
            info!("prebuilt gn and ninja are expected in {:?}", root.join("bin"));
        }
        Build { matrix, out, parallel, .. } => {
            let requests = matrix.requests();
            let settings = matrix.project_settings();
            let checkout = open_checkout(&root);
            let host = HostOs::current();
            let toolchain = GnNinja::new(&checkout, host.clone());
            let packager = Packager::new(&checkout, &settings, &root.join(out), host);
            let outcomes = packager
                .build(&toolchain, &requests, parallel)
                .unwrap_or_else(|e| failed_fast(e));
            let built = outcomes.iter().filter(|x| matches!(x, Outcome::Built { .. })).count();
            info!("{} built, {} skipped", built, outcomes.len() - built);
        }
        Archive { out, archive_dir, .. } => {
            let bundles = archive::archive(&root.join(archive_dir), &root.join(out))
                .unwrap_or_else(|e| failed_fast(e));
            info!("{} bundle(s) written", bundles.len());
        }
        Plan { matrix } => {
            let settings = matrix.project_settings();
            let plan = builder::plan(&settings, &matrix.requests(), &HostOs::current());
            let json = serde_json::to_string_pretty(&plan).unwrap_or_else(|e| failed_fast(e));
            println!("{}", json);
        }
    }
}
