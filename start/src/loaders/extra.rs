//! Units synthesized from the environment and the command line.

use crate::error::{Error, Result};
use crate::unit::{Unit, UnitKind, DEFAULT_GROUP};
use std::path::PathBuf;

/// Name of the unit built from trailing command line arguments.
pub const ARG_MAIN_NAME: &str = "arg-main";

/// Default name of the unit built from `MINIT_MAIN`.
pub const ENV_MAIN_NAME: &str = "env-main";

/// Build the unit described by `MINIT_MAIN`, `MINIT_MAIN_NAME`,
/// `MINIT_MAIN_GROUP`, `MINIT_MAIN_DIR` and `MINIT_MAIN_ONCE`.
///
/// Returns `None` when `MINIT_MAIN` is unset or blank.
pub fn env_main<F>(lookup: F) -> Result<Option<Unit>>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();

    let cmd = var("MINIT_MAIN");
    if cmd.is_empty() {
        return Ok(None);
    }

    let command = shlex::split(&cmd)
        .filter(|argv| !argv.is_empty())
        .ok_or_else(|| Error::ShellSplit(format!("invalid MINIT_MAIN {:?}", cmd)))?;

    let kind = if parse_bool(&var("MINIT_MAIN_ONCE")) {
        UnitKind::Once
    } else {
        UnitKind::Daemon
    };

    let mut name = var("MINIT_MAIN_NAME");
    if name.is_empty() {
        name = ENV_MAIN_NAME.to_string();
    }

    let mut unit = Unit::new(name, kind, command);
    let group = var("MINIT_MAIN_GROUP");
    if !group.is_empty() {
        unit.group = group;
    }
    let dir = var("MINIT_MAIN_DIR");
    if !dir.is_empty() {
        unit.exec.dir = Some(PathBuf::from(dir));
    }

    Ok(Some(unit))
}

/// Build the daemon unit for trailing command line arguments.
pub fn arg_main(args: &[String]) -> Option<Unit> {
    if args.is_empty() {
        return None;
    }
    let mut unit = Unit::new(ARG_MAIN_NAME, UnitKind::Daemon, args.to_vec());
    unit.group = DEFAULT_GROUP.to_string();
    Some(unit)
}

/// Accepts the usual spellings of true; anything else is false.
fn parse_bool(s: &str) -> bool {
    matches!(s, "1" | "t" | "T" | "true" | "TRUE" | "True")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_main_unset() {
        assert!(env_main(lookup(&[])).unwrap().is_none());
        assert!(env_main(lookup(&[("MINIT_MAIN", "  ")])).unwrap().is_none());
    }

    #[test]
    fn test_env_main_defaults() {
        let unit = env_main(lookup(&[("MINIT_MAIN", "redis-server --port '6379'")]))
            .unwrap()
            .unwrap();
        assert_eq!(unit.name, ENV_MAIN_NAME);
        assert_eq!(unit.group, DEFAULT_GROUP);
        assert_eq!(unit.kind, "daemon");
        assert_eq!(unit.exec.command, vec!["redis-server", "--port", "6379"]);
        assert_eq!(unit.exec.dir, None);
    }

    #[test]
    fn test_env_main_once() {
        let unit = env_main(lookup(&[
            ("MINIT_MAIN", "migrate"),
            ("MINIT_MAIN_NAME", "db-migrate"),
            ("MINIT_MAIN_GROUP", "setup"),
            ("MINIT_MAIN_DIR", "/srv/app"),
            ("MINIT_MAIN_ONCE", "true"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(unit.name, "db-migrate");
        assert_eq!(unit.group, "setup");
        assert_eq!(unit.kind, "once");
        assert_eq!(unit.exec.dir, Some(PathBuf::from("/srv/app")));
    }

    #[test]
    fn test_env_main_bad_quote() {
        assert!(matches!(
            env_main(lookup(&[("MINIT_MAIN", "echo 'oops")])),
            Err(Error::ShellSplit(_))
        ));
    }

    #[test]
    fn test_arg_main() {
        assert!(arg_main(&[]).is_none());
        let unit = arg_main(&["sleep".into(), "10".into()]).unwrap();
        assert_eq!(unit.name, ARG_MAIN_NAME);
        assert_eq!(unit.kind, "daemon");
        assert_eq!(unit.exec.command, vec!["sleep", "10"]);
    }
}
