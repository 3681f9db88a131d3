//! Language id guessing for documents loaded without an editor open event

/// Language id for a lower-cased file extension, `plaintext` when unknown
pub fn language_id_for_extension(extension: Option<&str>) -> &'static str {
    match extension.unwrap_or_default() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "go" => "go",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "java" => "java",
        "json" => "json",
        "jsonc" => "jsonc",
        "md" | "markdown" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "html" | "htm" => "html",
        "css" => "css",
        "sh" | "bash" => "shellscript",
        "lua" => "lua",
        "rb" => "ruby",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_extensions() {
        assert_eq!(language_id_for_extension(Some("rs")), "rust");
        assert_eq!(language_id_for_extension(Some("hpp")), "cpp");
        assert_eq!(language_id_for_extension(Some("zzz")), "plaintext");
        assert_eq!(language_id_for_extension(None), "plaintext");
    }
}
