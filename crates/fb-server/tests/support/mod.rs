#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fb_deploy::*;
use fb_server::ModelServer;

const PARAMETERS: &str = r#"FoamFile
{
    version     2.0;
    format      ascii;
    class       dictionary;
    object      parameters;
}

// inflow speed [m/s]
velocity        1.0;
"#;

const CONTROL_DICT: &str = "application simpleFoam;\nendTime 100;\n";

/// Reads `velocity` from the case, writes `output = 2 * velocity`.
pub const DOUBLING: &str = r#"v=$(sed -n 's/^velocity *\([^;]*\);.*/\1/p' constant/parameters)
awk -v v="$v" 'BEGIN { printf "output = %.12g\n", v * 2 }' > result.dat
echo "solved velocity=$v""#;

/// Writes the case's `endTime` as the output.
pub const ECHO_END_TIME: &str = r#"e=$(sed -n 's/^endTime *\([^;]*\);.*/\1/p' system/controlDict)
echo "output = $e" > result.dat"#;

pub const FAILING: &str = "echo '--> FOAM FATAL ERROR: maximum number of iterations exceeded' >&2; exit 1";

/// A temporary directory holding a template case, a workspace root and a
/// journal directory. Removed on drop.
pub struct Fixture {
    pub root: PathBuf,
}

impl Fixture {
    pub fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!("fb_server_{tag}_{}", uuid::Uuid::new_v4().simple()));
        let template = root.join("template");
        std::fs::create_dir_all(template.join("constant")).unwrap();
        std::fs::create_dir_all(template.join("system")).unwrap();
        std::fs::write(template.join("constant/parameters"), PARAMETERS).unwrap();
        std::fs::write(template.join("system/controlDict"), CONTROL_DICT).unwrap();
        Self { root }
    }

    pub fn template(&self) -> PathBuf {
        self.root.join("template")
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.root.join("journal")
    }

    /// Pad the template with `count` small files so copying it takes a
    /// noticeable while.
    pub fn bulk_up_template(&self, count: usize) {
        let bulk = self.template().join("constant/bulk");
        std::fs::create_dir_all(&bulk).unwrap();
        let body = "0 ".repeat(2048);
        for i in 0..count {
            std::fs::write(bulk.join(format!("field{i}")), &body).unwrap();
        }
    }

    /// The case directory of a live workspace, if one exists yet.
    pub fn live_case_dir(&self) -> Option<PathBuf> {
        self.workspace_dirs()
            .into_iter()
            .map(|dir| dir.join("case"))
            .find(|case| case.exists())
    }

    /// A one-input model whose single step runs `script` under `/bin/sh`.
    pub fn model(&self, name: &str, script: &str) -> ModelDef {
        ModelDef {
            name: name.to_string(),
            template: self.template(),
            inputs: vec![InputDef {
                name: "inflow_velocity".into(),
                size: 1,
                min: Some(0.0),
                max: Some(1000.0),
            }],
            substitutions: vec![SubstitutionDef {
                input: "inflow_velocity".into(),
                file: "constant/parameters".into(),
                locator: LocatorDef::KeyPath {
                    path: "velocity".into(),
                },
                format: FormatDef::Scalar,
            }],
            config: Vec::new(),
            solver: SolverDef {
                steps: vec![StepDef {
                    name: "solver".into(),
                    program: "/bin/sh".into(),
                    args: vec!["-c".into(), script.into()],
                }],
                timeout_s: 30.0,
                kill_grace_s: 0.2,
                log_tail_bytes: 4096,
                env: BTreeMap::new(),
            },
            outputs: vec![OutputDef {
                name: "doubled".into(),
                source: OutputSource::Scrape {
                    file: "result.dat".into(),
                    key: "output".into(),
                    aggregate: Aggregate::Last,
                },
            }],
            accept_partial_results: false,
        }
    }

    /// `model` plus an integer `end_time` option written into
    /// `system/controlDict`.
    pub fn with_end_time_option(&self, mut model: ModelDef) -> ModelDef {
        model.config.push(ConfigParamDef {
            name: "end_time".into(),
            kind: ConfigKind::Integer,
            default: ConfigValue::Integer(100),
            min: Some(1.0),
            max: None,
            choices: vec![],
            targets: vec![ConfigTargetDef {
                file: "system/controlDict".into(),
                locator: LocatorDef::KeyPath {
                    path: "endTime".into(),
                },
            }],
        });
        model
    }

    pub fn deployment(&self, models: Vec<ModelDef>, max_concurrent: usize, queue_wait_s: Option<f64>) -> Deployment {
        Deployment {
            version: LATEST_VERSION,
            server: ServerDef::default(),
            workspace: WorkspaceDef {
                root: self.workspace_root(),
                max_concurrent,
                queue_wait_s,
            },
            journal: None,
            models,
        }
    }

    pub fn server(&self, models: Vec<ModelDef>, max_concurrent: usize, queue_wait_s: Option<f64>) -> ModelServer {
        ModelServer::from_deployment(self.deployment(models, max_concurrent, queue_wait_s)).unwrap()
    }

    /// Workspace directories currently on disk.
    pub fn workspace_dirs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.workspace_root()) {
            Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let give_up = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= give_up {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}
