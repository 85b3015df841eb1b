//! Render runner: expand template files in place before anything starts.

use super::{Runner, RunnerContext};
use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::template;
use crate::unit::Unit;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs once at level 1.
pub struct RenderRunner {
    unit: Unit,
    journal: Arc<Journal>,
}

impl RenderRunner {
    pub fn new(ctx: RunnerContext) -> Result<Self> {
        if ctx.unit.files.is_empty() {
            return Err(Error::MissingFiles(ctx.unit.name.clone()));
        }
        Ok(Self {
            unit: ctx.unit,
            journal: ctx.journal,
        })
    }
}

/// Render every file matched by `files` in place.
fn render_all(files: &[String], raw: bool, journal: &Journal) {
    let env = template::environment();
    let vars = template::environ();

    for pattern in files {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                journal.error(format!("invalid pattern {}: {}", pattern, e));
                continue;
            }
        };

        for path in paths {
            let path = match path {
                Ok(path) => path,
                Err(e) => {
                    journal.error(format!("failed to match {}: {}", pattern, e));
                    continue;
                }
            };
            match render_file(&env, &vars, &path, raw) {
                Ok(()) => journal.print(format!("rendered {}", path.display())),
                Err(e) => journal.error(e),
            }
        }
    }
}

fn render_file(
    env: &minijinja::Environment<'_>,
    vars: &BTreeMap<String, String>,
    path: &Path,
    raw: bool,
) -> std::result::Result<(), String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    let rendered = template::render(env, &source, vars)
        .map_err(|e| format!("failed to render {}: {}", path.display(), e))?;
    let content = if raw {
        rendered
    } else {
        template::sanitize(&rendered)
    };

    std::fs::write(path, content).map_err(|e| format!("failed to write {}: {}", path.display(), e))
}

#[async_trait]
impl Runner for RenderRunner {
    fn name(&self) -> &str {
        &self.unit.name
    }

    async fn run(&self, _token: CancellationToken) {
        self.journal.print("runner started");

        let files = self.unit.files.clone();
        let raw = self.unit.raw;
        let journal = Arc::clone(&self.journal);
        if let Err(e) = tokio::task::spawn_blocking(move || render_all(&files, raw, &journal)).await {
            self.journal.error(format!("render aborted: {}", e));
        }

        self.journal.print("runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessSupervisor;
    use crate::unit::UnitKind;
    use tempfile::TempDir;

    fn runner(dir: &TempDir, files: Vec<String>, raw: bool) -> Result<RenderRunner> {
        let mut unit = Unit::new("conf", UnitKind::Render, Vec::new());
        unit.files = files;
        unit.raw = raw;
        let journal = Journal::new(dir.path(), &unit.canonical_name(), &unit.name)
            .unwrap()
            .without_console();
        RenderRunner::new(RunnerContext {
            unit,
            journal: Arc::new(journal),
            supervisor: Arc::new(ProcessSupervisor::new()),
        })
    }

    #[test]
    fn test_requires_files() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            runner(&dir, Vec::new(), false),
            Err(Error::MissingFiles(_))
        ));
    }

    #[tokio::test]
    async fn test_render_in_place() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("MINIT_TEST_RENDER", "  rendered  ");
        let conf = dir.path().join("app.conf");
        std::fs::write(
            &conf,
            "  value = {{ Env.MINIT_TEST_RENDER }}\n\n  host = {{ stringsToUpper('x') }}  \n",
        )
        .unwrap();
        let broken = dir.path().join("broken.conf");
        std::fs::write(&broken, "{% if %}").unwrap();

        let pattern = format!("{}/*.conf", dir.path().display());
        runner(&dir, vec![pattern], false)
            .unwrap()
            .run(CancellationToken::new())
            .await;

        assert_eq!(
            std::fs::read_to_string(&conf).unwrap(),
            "value = rendered\nhost = X\n"
        );
        assert_eq!(std::fs::read_to_string(&broken).unwrap(), "{% if %}");
        let err = std::fs::read_to_string(dir.path().join("conf.err.log")).unwrap();
        assert!(err.contains("failed to render"));
    }

    #[tokio::test]
    async fn test_render_raw() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("raw.txt");
        std::fs::write(&conf, "  {{ intNeg(2) }}\n\n").unwrap();

        runner(&dir, vec![conf.to_string_lossy().into_owned()], true)
            .unwrap()
            .run(CancellationToken::new())
            .await;

        assert_eq!(std::fs::read_to_string(&conf).unwrap(), "  -2\n\n");
    }
}
