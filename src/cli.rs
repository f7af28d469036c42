//! The external invocation is deliberately thin: `<program> <cmd>
//! [args...]`, nothing else. This is not a general container CLI -- see
//! [`crate::config`] for the knobs that exist instead as configuration.

#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
    /// No command was given; the caller should print the greeting and exit
    /// 0 without touching any namespace, cgroup, or netlink state.
    Nothing,
    Run(Vec<String>),
}

pub fn parse_args(args: impl IntoIterator<Item = String>) -> Invocation {
    let mut args = args.into_iter();
    args.next(); // argv[0]
    let command: Vec<String> = args.collect();
    if command.is_empty() {
        Invocation::Nothing
    } else {
        Invocation::Run(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_argv_is_nothing() {
        assert_eq!(parse_args(args(&["isolate"])), Invocation::Nothing);
    }

    #[test]
    fn command_and_args_pass_through_verbatim() {
        assert_eq!(
            parse_args(args(&["isolate", "echo", "hello"])),
            Invocation::Run(args(&["echo", "hello"]))
        );
    }
}
