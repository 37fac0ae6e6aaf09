//! Host validation tool for the resfence cgroup backend
//!
//! Probes the cgroup v1 layout exactly the way the database will at
//! startup, then runs the strict check and reports what it found. Run
//! this on every host before enabling resource groups.

#[cfg(target_os = "linux")]
mod linux_main {
    use clap::Parser;
    use serde_json::json;
    use tracing_subscriber::EnvFilter;

    use resfence::controller::{Controller, GroupId};
    use resfence::paths::BaseDir;
    use resfence::{CgroupV1, ResGroupOps, Tunables};

    /// Validate the cgroup v1 setup for resource groups
    #[derive(Parser, Debug)]
    #[command(name = "resfence-check")]
    #[command(version)]
    #[command(about = "Validate the cgroup v1 setup for resource groups", long_about = None)]
    struct Args {
        /// Path to a tunables YAML file
        #[arg(short, long)]
        config: Option<String>,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    }

    pub fn run() -> i32 {
        let args = Args::parse();

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();

        let tunables = match &args.config {
            Some(path) => match Tunables::load_from_file(path) {
                Ok(tunables) => tunables,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return 1;
                }
            },
            None => Tunables::default(),
        };

        let mut backend = CgroupV1::new(tunables);
        let usable = backend.probe();
        let check = if usable { backend.check() } else { Err(resfence::CgroupError::config("probe failed")) };
        let caps = backend.capabilities();

        if args.json {
            let dirs: Vec<_> = backend
                .path_layout()
                .map(|layout| {
                    Controller::ALL
                        .iter()
                        .filter_map(|&controller| {
                            let dir =
                                layout.try_build(GroupId::ROOT, BaseDir::Managed, controller, "")?;
                            Some(json!({
                                "controller": controller.name(),
                                "dir": dir,
                            }))
                        })
                        .collect()
                })
                .unwrap_or_default();

            let report = json!({
                "backend": backend.name(),
                "usable": usable,
                "check": match &check {
                    Ok(()) => json!("ok"),
                    Err(e) => json!(e.to_string()),
                },
                "mount_dir": backend.path_layout().map(|l| l.mount_dir().clone()),
                "managed_dirs": dirs,
                "capabilities": {
                    "memory": caps.memory,
                    "swap": caps.swap,
                    "cpuset": caps.cpuset,
                },
            });
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        } else {
            println!("backend: {}", backend.name());
            match backend.path_layout() {
                Some(layout) => println!("cgroup mount: {}", layout.mount_dir().display()),
                None => println!("cgroup mount: not found"),
            }
            if let Some(layout) = backend.path_layout() {
                for controller in Controller::ALL {
                    if let Some(dir) =
                        layout.try_build(GroupId::ROOT, BaseDir::Managed, controller, "")
                    {
                        println!("  {:<8} {}", controller.name(), dir.display());
                    }
                }
            }
            println!(
                "capabilities: memory={} swap={} cpuset={}",
                caps.memory, caps.swap, caps.cpuset
            );
            match &check {
                Ok(()) => println!("check: ok"),
                Err(e) => println!("check: FAILED: {e}"),
            }
        }

        if check.is_ok() {
            0
        } else {
            1
        }
    }
}

#[cfg(target_os = "linux")]
fn main() {
    std::process::exit(linux_main::run());
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("resfence-check requires Linux cgroups");
    std::process::exit(1);
}
