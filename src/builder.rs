use crate::checkout::Checkout;
use crate::driver::Toolchain;
use crate::error::Result;
use crate::export;
use crate::settings::{GnArgs, ProjectSettings};
use crate::types::{Arch, BuildRequest, HostOs, Platform};
use crate::env::EnvVars;
use hashbrown::{HashMap, HashSet};
use log::*;
use rayon::prelude::*;
use serde::*;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The request needs a different host OS than the one we run on.
    Host { required: String, actual: String },
    /// Arm64 builds only exist for Android.
    Arch,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Host { required, actual } => {
                write!(f, "requires a {} host, not supported on {}", required, actual)
            }
            SkipReason::Arch => f.write_str("architecture not supported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Built { libs: Vec<PathBuf> },
    Skipped(SkipReason),
}

/// Decides whether `request` can be built on `host`.
pub fn check(request: &BuildRequest, host: &HostOs) -> Option<SkipReason> {
    let required = request.platform.required_host();
    if &required != host {
        return Some(SkipReason::Host {
            required: required.to_string(),
            actual: host.to_string(),
        });
    }
    match (request.platform, request.arch) {
        (Platform::Windows, Arch::Arm64) | (Platform::Linux, Arch::Arm64) => Some(SkipReason::Arch),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
pub struct PlanEntry {
    pub request: BuildRequest,
    pub skip: Option<SkipReason>,
    pub args: GnArgs,
}

/// Resolves the whole matrix up front, without running anything.
pub fn plan(settings: &ProjectSettings, requests: &[BuildRequest], host: &HostOs) -> Vec<PlanEntry> {
    requests
        .iter()
        .map(|request| PlanEntry {
            request: *request,
            skip: check(request, host),
            args: settings.build_args(request),
        })
        .collect()
}

pub struct Packager<'a> {
    checkout: &'a Checkout,
    settings: &'a ProjectSettings,
    out_dir: PathBuf,
    host: HostOs,
    exported: Mutex<HashSet<(Platform, Arch)>>,
}

impl<'a> Packager<'a> {
    pub fn new(checkout: &'a Checkout, settings: &'a ProjectSettings, out_dir: &Path, host: HostOs) -> Self {
        Packager {
            checkout,
            settings,
            out_dir: out_dir.to_path_buf(),
            host,
            exported: Mutex::new(HashSet::new()),
        }
    }

    pub fn pair_dir(&self, platform: Platform, arch: Arch) -> PathBuf {
        self.out_dir.join(platform.dir_name()).join(arch.dir_name())
    }

    pub fn lib_dir(&self, request: &BuildRequest) -> PathBuf {
        self.pair_dir(request.platform, request.arch)
            .join("libs")
            .join(request.config.dir_name())
    }

    pub fn plan(&self, requests: &[BuildRequest]) -> Vec<PlanEntry> {
        plan(self.settings, requests, &self.host)
    }

    pub fn build<T: Toolchain>(&self, toolchain: &T, requests: &[BuildRequest], parallel: bool) -> Result<Vec<Outcome>> {
        let skipped = self
            .plan(requests)
            .into_iter()
            .filter(|x| x.skip.is_some())
            .count();
        if skipped > 0 {
            warn!("{} of {} requested builds will be skipped", skipped, requests.len());
        }
        if parallel {
            self.build_parallel(toolchain, requests)
        } else {
            requests
                .iter()
                .map(|x| match check(x, &self.host) {
                    Some(reason) => Ok(self.skip(x, reason)),
                    None => {
                        let env = toolchain.provision(x.platform, x.arch)?;
                        self.build_one(toolchain, x, &env)
                    }
                })
                .collect()
        }
    }

    /// Provisions every distinct pair up front, one at a time, then builds
    /// each distinct request once on the rayon pool. Duplicates share the
    /// outcome of their first occurrence.
    fn build_parallel<T: Toolchain>(&self, toolchain: &T, requests: &[BuildRequest]) -> Result<Vec<Outcome>> {
        let mut unique: Vec<BuildRequest> = Vec::new();
        for request in requests {
            if !unique.contains(request) {
                unique.push(*request);
            }
        }
        let mut envs: HashMap<(Platform, Arch), EnvVars> = HashMap::new();
        for request in unique.iter().filter(|x| check(x, &self.host).is_none()) {
            let pair = (request.platform, request.arch);
            if !envs.contains_key(&pair) {
                envs.insert(pair, toolchain.provision(request.platform, request.arch)?);
            }
        }
        let outcomes: HashMap<BuildRequest, Outcome> = unique
            .par_iter()
            .map(|x| {
                let outcome = match check(x, &self.host) {
                    Some(reason) => self.skip(x, reason),
                    None => self.build_one(toolchain, x, &envs[&(x.platform, x.arch)])?,
                };
                Ok((*x, outcome))
            })
            .collect::<Result<_>>()?;
        Ok(requests.iter().map(|x| outcomes[x].clone()).collect())
    }

    fn skip(&self, request: &BuildRequest, reason: SkipReason) -> Outcome {
        warn!("Skipping {} build for {}: {}", request.platform, request.arch, reason);
        Outcome::Skipped(reason)
    }

    fn build_one<T: Toolchain>(&self, toolchain: &T, request: &BuildRequest, env: &EnvVars) -> Result<Outcome> {
        info!("Building V8 v{} for {}:", self.checkout.version, request);
        let project = self.checkout.project_dir(request);
        toolchain.generate(&project, &self.settings.build_args(request), env)?;
        toolchain.compile(&project, env)?;
        let libs = export::export_libs(&project, &self.lib_dir(request), request.platform)?;

        if self.claim(request.platform, request.arch) {
            self.export_shared(request.platform, request.arch)?;
        }
        Ok(Outcome::Built { libs })
    }

    /// True the first time a pair is claimed during this run.
    fn claim(&self, platform: Platform, arch: Arch) -> bool {
        match self.exported.lock() {
            Ok(mut set) => set.insert((platform, arch)),
            Err(poisoned) => poisoned.into_inner().insert((platform, arch)),
        }
    }

    fn export_shared(&self, platform: Platform, arch: Arch) -> Result<()> {
        let dir = self.pair_dir(platform, arch);
        export::export_version(&dir, &self.checkout.version)?;
        let headers = export::export_includes(&self.checkout.include_dir(), &dir.join("include"))?;
        export::export_definitions(&dir, &self.settings.compile_definitions())?;
        info!("Exported {} headers for {} {}", headers, platform, arch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::tests::fake_root;
    use crate::error::Error;
    use crate::types::BuildConfig;
    use std::fs;
    use std::os::raw::c_int;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records every call and drops a library into the generated project.
    #[derive(Default)]
    struct FakeToolchain {
        calls: Mutex<Vec<String>>,
        fail_compile: bool,
        provision_delay: Option<Duration>,
        provisioning: AtomicUsize,
        peak_provisioning: AtomicUsize,
    }

    impl FakeToolchain {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Toolchain for FakeToolchain {
        fn provision(&self, platform: Platform, arch: Arch) -> Result<EnvVars> {
            let active = self.provisioning.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_provisioning.fetch_max(active, Ordering::SeqCst);
            if let Some(delay) = self.provision_delay {
                std::thread::sleep(delay);
            }
            self.calls.lock().unwrap().push(format!("provision {} {}", platform, arch));
            self.provisioning.fetch_sub(1, Ordering::SeqCst);
            Ok(EnvVars::new())
        }

        fn generate(&self, project: &Path, args: &GnArgs, _env: &EnvVars) -> Result<()> {
            self.calls.lock().unwrap().push(format!("generate {}", args["target_os"]));
            fs::create_dir_all(project).unwrap();
            fs::write(project.join("libv8.so"), "v8").unwrap();
            fs::write(project.join("libv8.cr.so"), "v8").unwrap();
            fs::write(project.join("build.ninja"), "").unwrap();
            Ok(())
        }

        fn compile(&self, _project: &Path, _env: &EnvVars) -> Result<()> {
            self.calls.lock().unwrap().push("compile".to_string());
            if self.fail_compile {
                return Err(Error::ToolFailed { command: "ninja".into(), status: exit_status(1) });
            }
            Ok(())
        }
    }

    #[cfg(unix)]
    fn exit_status(code: c_int) -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code << 8)
    }

    #[cfg(windows)]
    fn exit_status(code: c_int) -> std::process::ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code as u32)
    }

    fn request(platform: Platform, arch: Arch, config: BuildConfig) -> BuildRequest {
        BuildRequest::new(platform, arch, config)
    }

    #[test]
    fn skip_rules() {
        let linux = HostOs::Linux;
        assert_eq!(check(&request(Platform::Linux, Arch::X64, BuildConfig::Debug), &linux), None);
        assert_eq!(check(&request(Platform::Android, Arch::Arm64, BuildConfig::Debug), &linux), None);
        assert_eq!(
            check(&request(Platform::Linux, Arch::Arm64, BuildConfig::Debug), &linux),
            Some(SkipReason::Arch)
        );
        assert!(matches!(
            check(&request(Platform::Windows, Arch::X64, BuildConfig::Debug), &linux),
            Some(SkipReason::Host { .. })
        ));
        assert_eq!(
            check(&request(Platform::Windows, Arch::Arm64, BuildConfig::Debug), &HostOs::Windows),
            Some(SkipReason::Arch)
        );
        assert!(matches!(
            check(&request(Platform::Android, Arch::X64, BuildConfig::Debug), &HostOs::Other("macos".into())),
            Some(SkipReason::Host { .. })
        ));
    }

    #[test]
    fn unsupported_requests_are_skipped_and_the_run_continues() {
        let root = fake_root();
        let checkout = Checkout::open(root.path()).unwrap();
        let settings = ProjectSettings::default();
        let out = root.path().join("dist");
        let packager = Packager::new(&checkout, &settings, &out, HostOs::Linux);
        let toolchain = FakeToolchain::default();

        let outcomes = packager
            .build(
                &toolchain,
                &[
                    request(Platform::Windows, Arch::Arm64, BuildConfig::Debug),
                    request(Platform::Linux, Arch::X64, BuildConfig::Release),
                ],
                false,
            )
            .unwrap();

        assert!(matches!(outcomes[0], Outcome::Skipped(_)));
        assert_eq!(
            outcomes[1],
            Outcome::Built { libs: vec![out.join("linux/x64/libs/release/libv8.so")] }
        );
        assert_eq!(toolchain.calls(), vec!["provision Linux x64", "generate \"linux\"", "compile"]);
        assert!(!out.join("windows").exists());
    }

    #[test]
    fn shared_artifacts_are_exported_once_per_pair() {
        let root = fake_root();
        let checkout = Checkout::open(root.path()).unwrap();
        let settings = ProjectSettings::default();
        let out = root.path().join("dist");
        let packager = Packager::new(&checkout, &settings, &out, HostOs::Linux);
        let toolchain = FakeToolchain::default();

        packager
            .build(&toolchain, &[request(Platform::Linux, Arch::X64, BuildConfig::Debug)], false)
            .unwrap();
        let pair = out.join("linux/x64");
        assert_eq!(fs::read_to_string(pair.join("v8-version.txt")).unwrap(), "11.1.277.17");
        assert!(pair.join("include/v8.h").is_file());
        assert!(pair.join("include/cppgc/internal/api-constants.h").is_file());
        assert!(!pair.join("include/OWNERS").exists());
        assert!(pair.join("definitions.txt").is_file());

        // A second configuration for the same pair must leave shared files alone.
        fs::write(pair.join("v8-version.txt"), "marker").unwrap();
        fs::write(pair.join("include/extra.h"), "marker").unwrap();
        packager
            .build(&toolchain, &[request(Platform::Linux, Arch::X64, BuildConfig::Release)], false)
            .unwrap();
        assert_eq!(fs::read_to_string(pair.join("v8-version.txt")).unwrap(), "marker");
        assert!(pair.join("include/extra.h").is_file());
        assert!(pair.join("libs/debug/libv8.so").is_file());
        assert!(pair.join("libs/release/libv8.so").is_file());
    }

    #[test]
    fn android_exports_cr_libraries() {
        let root = fake_root();
        let checkout = Checkout::open(root.path()).unwrap();
        let settings = ProjectSettings::default();
        let out = root.path().join("dist");
        let packager = Packager::new(&checkout, &settings, &out, HostOs::Linux);

        let outcomes = packager
            .build(
                &FakeToolchain::default(),
                &[
                    request(Platform::Android, Arch::Arm64, BuildConfig::Debug),
                    request(Platform::Android, Arch::Arm64, BuildConfig::Release),
                    request(Platform::Android, Arch::X64, BuildConfig::Debug),
                ],
                true,
            )
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            outcomes[0],
            Outcome::Built { libs: vec![out.join("android/arm64/libs/debug/libv8.cr.so")] }
        );
        assert!(out.join("android/arm64/include/v8.h").is_file());
        assert!(out.join("android/x64/v8-version.txt").is_file());
    }

    #[test]
    fn parallel_runs_provision_each_pair_once_and_serially() {
        let root = fake_root();
        let checkout = Checkout::open(root.path()).unwrap();
        let settings = ProjectSettings::default();
        let out = root.path().join("dist");
        let packager = Packager::new(&checkout, &settings, &out, HostOs::Linux);
        let toolchain = FakeToolchain {
            provision_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let requests = [
            request(Platform::Linux, Arch::X64, BuildConfig::Debug),
            request(Platform::Linux, Arch::X64, BuildConfig::Release),
            request(Platform::Linux, Arch::X64, BuildConfig::Debug),
            request(Platform::Android, Arch::X64, BuildConfig::Debug),
            request(Platform::Android, Arch::X64, BuildConfig::Release),
            request(Platform::Linux, Arch::Arm64, BuildConfig::Debug),
        ];

        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let outcomes = pool.install(|| packager.build(&toolchain, &requests, true)).unwrap();

        assert_eq!(toolchain.peak_provisioning.load(Ordering::SeqCst), 1);
        let mut provisioned = toolchain
            .calls()
            .into_iter()
            .filter(|x| x.starts_with("provision"))
            .collect::<Vec<_>>();
        provisioned.sort();
        assert_eq!(provisioned, vec!["provision Android x64", "provision Linux x64"]);
        // The duplicate Linux debug request is built once and shares its outcome.
        assert_eq!(toolchain.calls().iter().filter(|x| *x == "compile").count(), 4);
        assert_eq!(outcomes.len(), requests.len());
        assert_eq!(
            outcomes[0],
            Outcome::Built { libs: vec![out.join("linux/x64/libs/debug/libv8.so")] }
        );
        assert_eq!(outcomes[2], outcomes[0]);
        assert_eq!(outcomes[5], Outcome::Skipped(SkipReason::Arch));
        assert!(out.join("linux/x64/libs/debug/libv8.so").is_file());
    }

    #[test]
    fn driver_failure_aborts_the_run() {
        let root = fake_root();
        let checkout = Checkout::open(root.path()).unwrap();
        let settings = ProjectSettings::default();
        let out = root.path().join("dist");
        let packager = Packager::new(&checkout, &settings, &out, HostOs::Linux);
        let toolchain = FakeToolchain { fail_compile: true, ..Default::default() };

        let result = packager.build(
            &toolchain,
            &[
                request(Platform::Linux, Arch::X64, BuildConfig::Debug),
                request(Platform::Android, Arch::X64, BuildConfig::Debug),
            ],
            false,
        );
        assert!(matches!(result, Err(Error::ToolFailed { .. })));
        assert_eq!(toolchain.calls(), vec!["provision Linux x64", "generate \"linux\"", "compile"]);
        assert!(!out.join("linux/x64/v8-version.txt").exists());
    }

    #[test]
    fn plan_resolves_args_and_skips() {
        let root = fake_root();
        let checkout = Checkout::open(root.path()).unwrap();
        let settings = ProjectSettings::default();
        let packager = Packager::new(&checkout, &settings, &root.path().join("dist"), HostOs::Windows);
        let plan = packager.plan(&BuildRequest::matrix(&Platform::ALL, &Arch::ALL, &[BuildConfig::Release]));
        assert_eq!(plan.len(), 6);
        let buildable = plan.iter().filter(|x| x.skip.is_none()).map(|x| x.request).collect::<Vec<_>>();
        assert_eq!(buildable, vec![request(Platform::Windows, Arch::X64, BuildConfig::Release)]);
        assert!(plan.iter().all(|x| x.args.contains_key("symbol_level")));
    }
}
