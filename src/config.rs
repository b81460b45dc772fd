//! Runtime configuration shared by the server and the client.

use std::path::PathBuf;

/// Socket file name inside the runtime directory.
const SOCKET_NAME: &str = "piemenu.sock";

/// Subdirectory under `XDG_RUNTIME_DIR`.
const RUNTIME_SUBDIR: &str = "piemenu";

/// Default bound on concurrently connected clients.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// Picker argument replaced by the current submenu's name.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Default socket path.
///
/// `$XDG_RUNTIME_DIR/piemenu/piemenu.sock` when the variable is set,
/// otherwise `/tmp/piemenu-<uid>/piemenu.sock`.
pub fn default_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map_or_else(
            || {
                let uid = nix::unistd::getuid();
                PathBuf::from("/tmp").join(format!("{RUNTIME_SUBDIR}-{uid}"))
            },
            |dir| PathBuf::from(dir).join(RUNTIME_SUBDIR),
        )
        .join(SOCKET_NAME)
}

/// External dmenu-compatible picker invocation.
#[derive(Debug, Clone)]
pub struct PickerConfig {
    pub program: String,
    /// Arguments; any equal to [`PROMPT_PLACEHOLDER`] are substituted.
    pub args: Vec<String>,
    /// Emit rofi icon hints (`label\0icon\x1f<icon>`).
    pub icons: bool,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            program: "dmenu".into(),
            args: vec!["-p".into(), PROMPT_PLACEHOLDER.into()],
            icons: false,
        }
    }
}

impl PickerConfig {
    /// Arguments for one invocation with `prompt` substituted.
    pub fn args_for(&self, prompt: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                if arg == PROMPT_PLACEHOLDER {
                    prompt.to_owned()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
    pub picker: PickerConfig,
}
