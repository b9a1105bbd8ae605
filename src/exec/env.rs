use std::collections::BTreeMap;
use std::path::Path;

const PATH: &str = "PATH";

/// Environment for a task process: `declared` variables over `inherited` ones.
///
/// With a `bin_dir`, it is put in front of the declared `PATH` if there is one,
/// otherwise in front of the inherited `PATH`, otherwise it becomes the whole `PATH`.
pub fn build_environment<I>(
    declared: &[(String, String)],
    inherited: I,
    bin_dir: Option<&Path>,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = inherited.into_iter().collect();
    let inherited_path = env.get(PATH).cloned();
    env.extend(declared.iter().cloned());

    if let Some(bin_dir) = bin_dir {
        let bin = bin_dir.to_string_lossy();
        let declared_path = declared.iter().rev().find(|(k, _)| k == PATH).map(|(_, v)| v);
        let path = match declared_path.or(inherited_path.as_ref()) {
            Some(rest) if !rest.is_empty() => format!("{bin}:{rest}"),
            _ => bin.into_owned(),
        };
        env.insert(PATH.to_owned(), path);
    }
    env
}

/// This process's environment, minus any variables that aren't valid unicode.
pub fn inherited_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}
