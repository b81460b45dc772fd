//! Command presenter — drives an external dmenu-compatible picker.
//!
//! Each menu level is piped to the picker's stdin one numbered entry per
//! line (`1 Files`, `2 Apps/`), submenus suffixed with `/`. The number at
//! the start of the line the picker prints selects the child, so equal
//! labels never pick the wrong entry. A submenu re-runs the picker on its
//! children, a leaf resolves the session. Anything else (non-zero exit,
//! empty or unnumbered output, spawn or I/O failure) resolves as a
//! cancellation.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Presenter, PresenterError, Reply};
use crate::config::PickerConfig;
use crate::menu::{self, MenuNode};

/// Suffix marking submenu entries in the picker.
const SUBMENU_MARKER: char = '/';

/// Presenter backed by `dmenu`, `rofi -dmenu` and friends.
pub struct CommandPresenter {
    picker: Arc<PickerConfig>,
}

impl CommandPresenter {
    pub fn new(picker: PickerConfig) -> Self {
        Self {
            picker: Arc::new(picker),
        }
    }
}

impl Presenter for CommandPresenter {
    fn display(&self, menu: Arc<MenuNode>, reply: Reply) {
        let picker = Arc::clone(&self.picker);
        tokio::spawn(async move {
            match navigate(&picker, &menu).await {
                Ok(Some(item)) => reply.select(item),
                Ok(None) => reply.cancel(),
                Err(e) => {
                    tracing::warn!(error = %e, "picker failed; cancelling session");
                    reply.cancel();
                }
            }
        });
    }
}

/// Walk the tree one picker invocation per level.
///
/// Returns the identifier ([`menu::item_path`]) of the chosen leaf below
/// `root`, or `None` if the user backed out at any level.
pub(crate) async fn navigate(
    picker: &PickerConfig,
    root: &MenuNode,
) -> Result<Option<String>, PresenterError> {
    let mut node = root;
    let mut path = Vec::new();

    loop {
        let Some(index) = pick(picker, node).await? else {
            return Ok(None);
        };
        let Some(child) = node.children().get(index) else {
            tracing::debug!(index, menu = node.name(), "picker returned an entry out of range");
            return Ok(None);
        };
        path.push(child.name());
        if child.is_leaf() {
            return Ok(Some(menu::item_path(path)));
        }
        node = child;
    }
}

/// Single-line form of `text`: line breaks and the bytes rofi treats as
/// field separators become spaces.
fn one_line(text: &str) -> String {
    text.chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\0' | '\x1f') { ' ' } else { c })
        .collect()
}

/// Picker line for the child at `index`, numbered from 1.
fn entry(index: usize, node: &MenuNode, icons: bool) -> String {
    let mut line = format!("{} {}", index + 1, one_line(node.name()));
    if !node.is_leaf() {
        line.push(SUBMENU_MARKER);
    }
    if icons {
        line.push_str("\0icon\x1f");
        line.push_str(&one_line(node.icon()));
    }
    line.push('\n');
    line
}

/// Index encoded by the leading number of a picker output line.
fn chosen_index(line: &str) -> Option<usize> {
    let number = line.split_once(' ').map_or(line, |(number, _)| number);
    number.parse::<usize>().ok()?.checked_sub(1)
}

/// Run the picker once over `node`'s children; returns the chosen index.
async fn pick(picker: &PickerConfig, node: &MenuNode) -> Result<Option<usize>, PresenterError> {
    let input: String = node
        .children()
        .iter()
        .enumerate()
        .map(|(i, child)| entry(i, child, picker.icons))
        .collect();

    let mut child = Command::new(&picker.program)
        .args(picker.args_for(node.name()))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| PresenterError::Spawn {
            program: picker.program.clone(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // A picker may exit without reading everything; its exit status decides.
        if let Err(e) = stdin.write_all(input.as_bytes()).await {
            tracing::debug!(error = %e, "picker closed stdin early");
        }
        // Drop stdin to close the pipe so the picker sees EOF.
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        tracing::debug!(status = %output.status, menu = node.name(), "picker dismissed");
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let chosen = stdout.trim_end_matches(['\n', '\r']);
    if chosen.is_empty() {
        return Ok(None);
    }

    let index = chosen_index(chosen);
    if index.is_none() {
        tracing::debug!(chosen, menu = node.name(), "picker returned an unknown entry");
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu;
    use crate::session::{Outcome, SessionMachine};

    fn script(body: &str) -> PickerConfig {
        PickerConfig {
            program: "sh".into(),
            args: vec!["-c".into(), body.into()],
            icons: false,
        }
    }

    fn nested() -> MenuNode {
        menu::parse(
            r#"{"name":"Root","icon":"r","items":[
                {"name":"Files","icon":"f"},
                {"name":"Apps","icon":"a","items":[
                    {"name":"Editor","icon":"e"},
                    {"name":"Terminal","icon":"t"}]}]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn first_entry_is_a_leaf() {
        let chosen = navigate(&script("head -n1"), &nested()).await.unwrap();
        assert_eq!(chosen.as_deref(), Some("Files"));
    }

    #[tokio::test]
    async fn descends_into_submenus() {
        let chosen = navigate(&script("tail -n1"), &nested()).await.unwrap();
        assert_eq!(chosen.as_deref(), Some("Apps/Terminal"));
    }

    #[tokio::test]
    async fn prompt_names_current_level() {
        let picker = PickerConfig {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                r#"if [ "$0" = Root ]; then echo '2 Apps/'; else echo '1 Editor'; fi"#.into(),
                crate::config::PROMPT_PLACEHOLDER.into(),
            ],
            icons: false,
        };
        let chosen = navigate(&picker, &nested()).await.unwrap();
        assert_eq!(chosen.as_deref(), Some("Apps/Editor"));
    }

    #[tokio::test]
    async fn icon_hints_follow_labels() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("stdin");
        let picker = PickerConfig {
            icons: true,
            ..script(&format!(
                "cat > '{0}'; tr '\\000' '\\n' < '{0}' | head -n1",
                seen.display()
            ))
        };

        let chosen = navigate(&picker, &nested()).await.unwrap();
        assert_eq!(chosen.as_deref(), Some("Files"));

        let written = std::fs::read(&seen).unwrap();
        assert_eq!(written, b"1 Files\0icon\x1ff\n2 Apps/\0icon\x1fa\n");
    }

    #[tokio::test]
    async fn duplicate_labels_resolve_by_position() {
        let menu = menu::parse(
            r#"{"name":"Root","icon":"r","items":[
                {"name":"Apps/","icon":"l"},
                {"name":"Apps","icon":"s","items":[{"name":"Term","icon":"t"}]}]}"#,
        )
        .unwrap();
        let chosen = navigate(&script("tail -n1"), &menu).await.unwrap();
        assert_eq!(chosen.as_deref(), Some("Apps/Term"));

        let chosen = navigate(&script("head -n1"), &menu).await.unwrap();
        assert_eq!(chosen.as_deref(), Some(r"Apps\/"));
    }

    #[tokio::test]
    async fn names_with_line_breaks_stay_on_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("stdin");
        let menu = menu::parse(
            r#"{"name":"Root","icon":"r","items":[
                {"name":"X\nB","icon":"x"},{"name":"B","icon":"b"}]}"#,
        )
        .unwrap();
        let picker = script(&format!("cat > '{0}'; head -n1 '{0}'", seen.display()));

        let chosen = navigate(&picker, &menu).await.unwrap();
        assert_eq!(chosen.as_deref(), Some("X\nB"));
        assert_eq!(std::fs::read(&seen).unwrap(), b"1 X B\n2 B\n");
    }

    #[tokio::test]
    async fn slash_in_a_leaf_name_is_escaped() {
        let menu = menu::parse(
            r#"{"name":"Root","icon":"r","items":[
                {"name":"A/B","icon":"x"},
                {"name":"A","icon":"a","items":[{"name":"B","icon":"b"}]}]}"#,
        )
        .unwrap();
        let top = navigate(&script("head -n1"), &menu).await.unwrap();
        let nested = navigate(&script("tail -n1"), &menu).await.unwrap();
        assert_eq!(top.as_deref(), Some(r"A\/B"));
        assert_eq!(nested.as_deref(), Some("A/B"));
    }

    #[tokio::test]
    async fn out_of_range_number_cancels() {
        assert_eq!(
            navigate(&script("cat >/dev/null; echo '9 Ghost'"), &nested())
                .await
                .unwrap(),
            None
        );
    }

    #[test]
    fn entry_numbers_and_marks_submenus() {
        let menu = nested();
        assert_eq!(entry(0, &menu.children()[0], false), "1 Files\n");
        assert_eq!(entry(1, &menu.children()[1], false), "2 Apps/\n");
    }

    #[test]
    fn chosen_index_reads_the_leading_number() {
        assert_eq!(chosen_index("1 Files"), Some(0));
        assert_eq!(chosen_index("12"), Some(11));
        assert_eq!(chosen_index("0 Nope"), None);
        assert_eq!(chosen_index("Files"), None);
        assert_eq!(chosen_index(""), None);
    }

    #[tokio::test]
    async fn non_zero_exit_cancels() {
        assert_eq!(navigate(&script("exit 1"), &nested()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_output_cancels() {
        assert_eq!(
            navigate(&script("cat >/dev/null; echo Nope"), &nested())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn empty_output_cancels() {
        assert_eq!(
            navigate(&script("cat >/dev/null"), &nested()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let picker = PickerConfig {
            program: "/nonexistent/picker".into(),
            args: vec![],
            icons: false,
        };
        let err = navigate(&picker, &nested()).await.unwrap_err();
        assert!(matches!(err, PresenterError::Spawn { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_resolves_session_as_cancelled() {
        let presenter = CommandPresenter::new(PickerConfig {
            program: "/nonexistent/picker".into(),
            args: vec![],
            icons: false,
        });
        let machine = SessionMachine::new(Arc::new(presenter));
        let mut rx = machine.subscribe();

        let id = machine.begin(nested()).unwrap();
        let note = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.id, id);
        assert_eq!(note.outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn selection_resolves_session() {
        let machine = SessionMachine::new(Arc::new(CommandPresenter::new(script("tail -n1"))));
        let mut rx = machine.subscribe();

        let id = machine.begin(nested()).unwrap();
        let note = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.id, id);
        assert_eq!(note.outcome, Outcome::Selected("Apps/Terminal".into()));
    }
}
