//! Helpers shared by task modules.
mod names;
mod remote;
mod shell;
mod text;

pub use names::{sanitize_filename, validate_identifier};
pub use remote::{read_file_if_exists, sudo_prefix, MISSING_FILE_SENTINEL};
pub use shell::{sh_command, shell_escape};
pub use text::{clean_list, has_exact_line, line_set, parse_key_value_settings};
