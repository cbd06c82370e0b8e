//! Parsing of sway IPC output
//!
//! `swaymsg -t get_tree` returns the whole container tree; window events
//! from `swaymsg -m -t subscribe '["window"]'` arrive one JSON object per line.

use serde_json::Value;
use warden_util::AppId;

/// A window as far as foreground tracking cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwayWindow {
    pub app: AppId,
    pub pid: Option<i32>,
}

/// Identity of a window node: Wayland `app_id`, else the X11 class
fn window_of(node: &Value) -> Option<SwayWindow> {
    let app_id = node
        .get("app_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            node.get("window_properties")
                .and_then(|p| p.get("class"))
                .and_then(Value::as_str)
        })?;

    Some(SwayWindow {
        app: AppId::new(app_id),
        pid: node
            .get("pid")
            .and_then(Value::as_i64)
            .and_then(|p| i32::try_from(p).ok()),
    })
}

fn children(node: &Value) -> impl Iterator<Item = &Value> {
    ["nodes", "floating_nodes"]
        .into_iter()
        .filter_map(|key| node.get(key).and_then(Value::as_array))
        .flatten()
}

/// The focused window in a `get_tree` result
pub fn focused_window(tree: &Value) -> Option<SwayWindow> {
    if tree.get("focused").and_then(Value::as_bool) == Some(true)
        && let Some(window) = window_of(tree)
    {
        return Some(window);
    }
    children(tree).find_map(focused_window)
}

/// Process ids of every window belonging to `app`
pub fn pids_for_app(tree: &Value, app: &AppId) -> Vec<i32> {
    let mut pids = Vec::new();
    collect_pids(tree, app, &mut pids);
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn collect_pids(node: &Value, app: &AppId, pids: &mut Vec<i32>) {
    if let Some(window) = window_of(node)
        && window.app == *app
        && let Some(pid) = window.pid
    {
        pids.push(pid);
    }
    for child in children(node) {
        collect_pids(child, app, pids);
    }
}

/// Foreground change carried by one subscribe line, if any
pub fn parse_window_event(line: &str) -> Option<SwayWindow> {
    let event: Value = serde_json::from_str(line).ok()?;
    match event.get("change").and_then(Value::as_str)? {
        "focus" => window_of(event.get("container")?),
        _ => None,
    }
}
