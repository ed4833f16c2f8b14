/// Patterns denied regardless of configuration, merged (not replaced) into
/// every active `Denylist` rule set. Mirrors the original system's
/// `get_default_blacklist()`, which is folded into `set_host_rules` /
/// `set_global_rules` additively rather than being an opt-in list.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "rm", "mkfs*", "dd", "shutdown", "reboot", "halt", "poweroff", "init",
    "passwd", "useradd", "userdel", "visudo", "chpasswd",
];
