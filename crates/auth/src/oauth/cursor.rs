/// Splits a stored Cursor credential (`token:::machine_id`) back into its parts.
pub fn parse_cursor_token(combined: &str) -> (String, String) {
    if let Some((token, machine)) = combined.split_once(":::") {
        (token.to_string(), machine.to_string())
    } else {
        (combined.to_string(), String::new())
    }
}
