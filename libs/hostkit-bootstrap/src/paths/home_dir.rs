use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("HOME environment variable is not set")]
    HomeMissing,
    #[error("APPDATA environment variable is not set")]
    AppDataMissing,
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Environment values consulted while resolving the home directory.
#[derive(Debug, Clone, Default)]
pub struct HomeEnv {
    /// Target of `~` expansion (`HOME`, or `USERPROFILE` on Windows).
    pub user_home: Option<PathBuf>,
    /// Parent of the default directory on Windows (`APPDATA`).
    pub app_data: Option<PathBuf>,
}

impl HomeEnv {
    pub fn from_process() -> Self {
        let user_home = if cfg!(target_os = "windows") {
            env::var_os("USERPROFILE").or_else(|| env::var_os("HOME"))
        } else {
            env::var_os("HOME")
        };
        Self {
            user_home: user_home.map(PathBuf::from),
            app_data: env::var_os("APPDATA").map(PathBuf::from),
        }
    }

    fn default_root(&self) -> Result<&Path, HomeDirError> {
        if cfg!(target_os = "windows") {
            self.app_data.as_deref().ok_or(HomeDirError::AppDataMissing)
        } else {
            self.user_home.as_deref().ok_or(HomeDirError::HomeMissing)
        }
    }
}

/// Normalize and resolve the home directory path.
///
/// A configured value may start with `~` (expanded to the user home) and must be
/// absolute afterwards. Without a configured value the directory is
/// `$HOME/<default_subdir>` (`%APPDATA%\<default_subdir>` on Windows).
///
/// If `create` is true, the directory is created if missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    resolve_home_dir_with(&HomeEnv::from_process(), config_home, default_subdir, create)
}

/// Same as [`resolve_home_dir`] with an explicit environment.
pub fn resolve_home_dir_with(
    env: &HomeEnv,
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match config_home {
        Some(raw) => {
            let expanded = expand_tilde(env, &raw)?;
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(
                    expanded.to_string_lossy().into(),
                ));
            }
            expanded
        }
        None => env.default_root()?.join(default_subdir),
    };

    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

fn expand_tilde(env: &HomeEnv, raw: &str) -> Result<PathBuf, HomeDirError> {
    let Some(rest) = raw.strip_prefix('~') else {
        return Ok(PathBuf::from(raw));
    };
    let home = env.user_home.as_deref().ok_or(HomeDirError::HomeMissing)?;
    // "~user" forms are not supported; the remainder is joined onto the current user's home
    let rest = rest.trim_start_matches(['/', '\\']);
    if rest.is_empty() {
        Ok(home.to_path_buf())
    } else {
        Ok(home.join(rest))
    }
}
