//! Process titles.

/// Title for a process: `label` followed by the original arguments.
pub fn process_title<S: AsRef<str>>(label: &str, args: &[S]) -> String {
    let args = args.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ");
    if args.is_empty() {
        label.to_string()
    } else {
        format!("{} {}", label, args)
    }
}

/// Title built from the current process arguments.
pub fn current_title(label: &str) -> String {
    let args: Vec<String> = std::env::args().skip(1).collect();
    process_title(label, &args)
}

/// Set the process title.
///
/// On Linux this sets the thread name shown by `ps -o comm` (the kernel
/// truncates it to 15 bytes). Elsewhere the title is only logged.
pub fn set_process_title(title: &str) {
    #[cfg(target_os = "linux")]
    {
        match std::ffi::CString::new(title) {
            Ok(name) => {
                if let Err(e) = nix::sys::prctl::set_name(&name) {
                    tracing::debug!(error = %e, "Failed to set process name");
                }
            }
            Err(e) => tracing::debug!(error = %e, "Process title contains NUL"),
        }
    }
    tracing::debug!(title = %title, "Process title set");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_without_args() {
        let args: [&str; 0] = [];
        assert_eq!(process_title("app master", &args), "app master");
    }

    #[test]
    fn test_title_with_args() {
        assert_eq!(
            process_title("app worker", &["--config", "prod.toml"]),
            "app worker --config prod.toml"
        );
    }
}
