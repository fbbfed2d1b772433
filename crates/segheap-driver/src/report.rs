use std::{error::Error, fmt};

use snafu::Location;

const RED: u8 = 31;
const DARK_GRAY: u8 = 90;

struct WithFg<T>(u8, T);

impl<T> fmt::Display for WithFg<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(fg, value) = self;
        write!(f, "\x1B[{fg};1m{value}\x1B[0m")
    }
}

/// An error whose creation site is recorded.
pub trait Located: Error {
    fn location(&self) -> Location;
}

/// Renders an error with its location and its chain of causes.
pub struct Report<E> {
    error: E,
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Located,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", WithFg(RED, &self.error))?;
        writeln!(f, "  at {}", WithFg(DARK_GRAY, self.error.location()))?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {}", WithFg(RED, s))?;
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use snafu::{ResultExt as _, Snafu};

    use super::*;

    #[derive(Debug, Snafu)]
    enum Inner {
        #[snafu(display("inner failure"))]
        Failure,
    }

    #[derive(Debug, Snafu)]
    #[snafu(display("outer failure"))]
    struct Outer {
        source: Inner,
        #[snafu(implicit)]
        location: Location,
    }

    impl Located for Outer {
        fn location(&self) -> Location {
            self.location
        }
    }

    #[test]
    fn test_report_lists_cause_chain() {
        let err = Err::<(), Inner>(FailureSnafu.build()).context(OuterSnafu).unwrap_err();
        let text = Report::new(err).to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Error: \x1B[31;1mouter failure\x1B[0m");
        assert!(lines[1].starts_with("  at \x1B[90;1m"));
        assert!(lines[1].contains("report.rs"));
        assert_eq!(lines[3], "Caused by:");
        assert_eq!(lines[4], "   0: \x1B[31;1minner failure\x1B[0m");
    }
}
