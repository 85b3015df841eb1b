//! Template context for render units.
//!
//! Templates are rendered with `minijinja` against a context holding `Env`,
//! a trimmed snapshot of the process environment, plus a library of host
//! and string helpers registered as global functions.

use minijinja::{context, Environment, Error, ErrorKind, UndefinedBehavior};
use std::collections::BTreeMap;

/// Snapshot of the process environment with keys and values trimmed.
pub fn environ() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| {
            let k = k.into_string().ok()?;
            let v = v.into_string().ok()?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Build an environment with the function library registered.
pub fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env.set_keep_trailing_newline(true);

    env.add_function("osHostname", os_hostname);
    env.add_function("osGetenv", os_getenv);
    env.add_function("osGetpid", os_getpid);
    env.add_function("osGetppid", os_getppid);
    env.add_function("osGetuid", os_getuid);
    env.add_function("osGetgid", os_getgid);
    env.add_function("osGeteuid", os_geteuid);
    env.add_function("osGetegid", os_getegid);
    env.add_function("osGetwd", os_getwd);
    env.add_function("osTempDir", os_temp_dir);
    env.add_function("osUserHomeDir", os_user_home_dir);

    env.add_function("stringsContains", strings_contains);
    env.add_function("stringsHasPrefix", strings_has_prefix);
    env.add_function("stringsHasSuffix", strings_has_suffix);
    env.add_function("stringsToUpper", strings_to_upper);
    env.add_function("stringsToLower", strings_to_lower);
    env.add_function("stringsTrimSpace", strings_trim_space);
    env.add_function("stringsTrimPrefix", strings_trim_prefix);
    env.add_function("stringsTrimSuffix", strings_trim_suffix);
    env.add_function("stringsReplaceAll", strings_replace_all);
    env.add_function("stringsRepeat", strings_repeat);
    env.add_function("stringsSplit", strings_split);
    env.add_function("stringsFields", strings_fields);

    env.add_function("strconvQuote", strconv_quote);
    env.add_function("strconvAtoi", strconv_atoi);
    env.add_function("strconvItoa", strconv_itoa);

    env.add_function("intAdd", int_add);
    env.add_function("intNeg", int_neg);
    env.add_function("floatAdd", float_add);
    env.add_function("floatNeg", float_neg);

    env.add_function("k8sStatefulSetID", k8s_stateful_set_id);

    env
}

/// Render `source` with `Env` bound to `vars`.
pub fn render(
    env: &Environment<'_>,
    source: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, Error> {
    env.render_str(source, context! { Env => vars })
}

/// Trim every line and drop blank ones.
pub fn sanitize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn host_error(e: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidOperation, e.to_string())
}

fn os_hostname() -> Result<String, Error> {
    nix::unistd::gethostname()
        .map_err(host_error)?
        .into_string()
        .map_err(|_| host_error("hostname is not valid utf-8"))
}

fn os_getenv(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn os_getpid() -> i64 {
    std::process::id() as i64
}

fn os_getppid() -> i64 {
    nix::unistd::getppid().as_raw() as i64
}

fn os_getuid() -> i64 {
    nix::unistd::getuid().as_raw() as i64
}

fn os_getgid() -> i64 {
    nix::unistd::getgid().as_raw() as i64
}

fn os_geteuid() -> i64 {
    nix::unistd::geteuid().as_raw() as i64
}

fn os_getegid() -> i64 {
    nix::unistd::getegid().as_raw() as i64
}

fn os_getwd() -> Result<String, Error> {
    std::env::current_dir()
        .map(|d| d.to_string_lossy().into_owned())
        .map_err(host_error)
}

fn os_temp_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

fn os_user_home_dir() -> Result<String, Error> {
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        return Ok(home.to_string_lossy().into_owned());
    }
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .map_err(host_error)?
        .map(|user| user.dir.to_string_lossy().into_owned())
        .ok_or_else(|| host_error("home directory is unknown"))
}

fn strings_contains(s: &str, substr: &str) -> bool {
    s.contains(substr)
}

fn strings_has_prefix(s: &str, prefix: &str) -> bool {
    s.starts_with(prefix)
}

fn strings_has_suffix(s: &str, suffix: &str) -> bool {
    s.ends_with(suffix)
}

fn strings_to_upper(s: &str) -> String {
    s.to_uppercase()
}

fn strings_to_lower(s: &str) -> String {
    s.to_lowercase()
}

fn strings_trim_space(s: &str) -> String {
    s.trim().to_string()
}

fn strings_trim_prefix(s: &str, prefix: &str) -> String {
    s.strip_prefix(prefix).unwrap_or(s).to_string()
}

fn strings_trim_suffix(s: &str, suffix: &str) -> String {
    s.strip_suffix(suffix).unwrap_or(s).to_string()
}

fn strings_replace_all(s: &str, old: &str, new: &str) -> String {
    s.replace(old, new)
}

fn strings_repeat(s: &str, count: i64) -> Result<String, Error> {
    let count = usize::try_from(count).map_err(|_| host_error("negative repeat count"))?;
    Ok(s.repeat(count))
}

fn strings_split(s: &str, sep: &str) -> Vec<String> {
    if sep.is_empty() {
        return s.chars().map(String::from).collect();
    }
    s.split(sep).map(String::from).collect()
}

fn strings_fields(s: &str) -> Vec<String> {
    s.split_whitespace().map(String::from).collect()
}

fn strconv_quote(s: &str) -> String {
    format!("{:?}", s)
}

fn strconv_atoi(s: &str) -> Result<i64, Error> {
    s.parse::<i64>()
        .map_err(|e| host_error(format!("cannot parse {:?}: {}", s, e)))
}

fn strconv_itoa(i: i64) -> String {
    i.to_string()
}

fn int_add(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

fn int_neg(a: i64) -> i64 {
    a.wrapping_neg()
}

fn float_add(a: f64, b: f64) -> f64 {
    a + b
}

fn float_neg(a: f64) -> f64 {
    -a
}

/// Ordinal of a stateful set pod, taken from the hostname suffix.
fn k8s_stateful_set_id() -> Result<i64, Error> {
    let hostname = match std::env::var("HOSTNAME") {
        Ok(h) if !h.is_empty() => h,
        _ => os_hostname()?,
    };
    stateful_set_id(&hostname)
}

fn stateful_set_id(hostname: &str) -> Result<i64, Error> {
    let Some((_, ordinal)) = hostname.rsplit_once('-') else {
        return Err(host_error("invalid stateful-set hostname"));
    };
    ordinal
        .parse::<i64>()
        .map_err(|e| host_error(format!("invalid stateful-set ordinal: {}", e)))
}
