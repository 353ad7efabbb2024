//! Action template resolution
//!
//! `#NAME#` placeholders are replaced with facts about the transfer, then
//! every `%s` is filled left to right from the transfer arguments. Unknown
//! placeholders and surplus `%s` markers are left untouched.

use crate::session::TransferSession;
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"#([A-Z]+)#").ok())
        .as_ref()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn placeholder_value(name: &str, session: &TransferSession) -> Option<String> {
    let info = session.info();
    let value = match name {
        "TRUEFULLPATH" => session.file().true_path().display().to_string(),
        "TRUEFILENAME" => file_name(&session.file().true_path()),
        "ORIGINALFULLPATH" => info.original_path.clone(),
        "ORIGINALFILENAME" => file_name(Path::new(&info.original_path)),
        "SPECIALID" | "TRANSFERID" => session.record().id().to_string(),
        "REMOTEHOST" => info.remote_host.clone(),
        "LOCALHOST" => info.local_host.clone(),
        "RULE" => info.rule.clone(),
        "DATE" => chrono::Local::now().format("%Y%m%d").to_string(),
        "HOUR" => chrono::Local::now().format("%H%M%S").to_string(),
        _ => return None,
    };
    Some(value)
}

/// Resolve `template` for `session`, filling `%s` from `transfer_args`
pub fn resolve_template(
    template: &str,
    session: &TransferSession,
    transfer_args: &[String],
) -> String {
    let substituted = match placeholder_pattern() {
        Some(pattern) => pattern
            .replace_all(template, |caps: &Captures<'_>| {
                placeholder_value(&caps[1], session).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned(),
        None => template.to_string(),
    };

    let mut resolved = String::with_capacity(substituted.len());
    let mut rest = substituted.as_str();
    let mut args = transfer_args.iter();
    while let Some(pos) = rest.find("%s") {
        resolved.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => resolved.push_str(arg),
            None => resolved.push_str("%s"),
        }
        rest = &rest[pos + 2..];
    }
    resolved.push_str(rest);
    resolved
}
