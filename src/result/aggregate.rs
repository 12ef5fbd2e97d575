//! Status rollup from children to parent

use super::node::ResultNode;
use super::status::Status;

/// Compute a parent's status from its children.
///
/// Precedence: any running child makes the parent running, then any pending
/// child makes it pending, then any failed or errored child makes it a
/// failure. Everything else (including skipped children) is a success.
///
/// Only meaningful for a non-empty child list; leaves keep their own status.
pub fn aggregate(children: &[ResultNode]) -> Status {
    aggregate_statuses(children.iter().map(|child| child.status))
}

/// [`aggregate`] over bare statuses
pub fn aggregate_statuses<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let (mut has_running, mut has_pending, mut has_failed) = (false, false, false);

    for status in statuses {
        match status {
            Status::Running => has_running = true,
            Status::Pending => has_pending = true,
            Status::Failure | Status::Error => has_failed = true,
            Status::Success | Status::Skipped => {}
        }
    }

    if has_running {
        Status::Running
    } else if has_pending {
        Status::Pending
    } else if has_failed {
        Status::Failure
    } else {
        Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERMINAL: [Status; 4] = [
        Status::Success,
        Status::Failure,
        Status::Error,
        Status::Skipped,
    ];

    #[test]
    fn test_running_wins_over_everything() {
        let statuses = [Status::Failure, Status::Pending, Status::Running, Status::Success];
        assert_eq!(aggregate_statuses(statuses), Status::Running);
    }

    #[test]
    fn test_pending_wins_over_terminal() {
        let statuses = [Status::Error, Status::Pending, Status::Success];
        assert_eq!(aggregate_statuses(statuses), Status::Pending);
    }

    #[test]
    fn test_error_rolls_up_as_failure() {
        assert_eq!(aggregate_statuses([Status::Success, Status::Error]), Status::Failure);
    }

    #[test]
    fn test_skipped_counts_as_success() {
        assert_eq!(aggregate_statuses([Status::Skipped, Status::Success]), Status::Success);
        assert_eq!(aggregate_statuses([Status::Skipped]), Status::Success);
    }

    #[test]
    fn test_any_failure_among_terminal_statuses() {
        // every 3-element combination of terminal statuses
        for a in TERMINAL {
            for b in TERMINAL {
                for c in TERMINAL {
                    let statuses = [a, b, c];
                    let expected = if statuses.iter().any(|s| s.is_failed()) {
                        Status::Failure
                    } else {
                        Status::Success
                    };
                    assert_eq!(aggregate_statuses(statuses), expected, "{statuses:?}");
                }
            }
        }
    }

    #[test]
    fn test_aggregate_over_nodes() {
        let children = vec![
            ResultNode::new("a", Status::Success),
            ResultNode::new("b", Status::Failure),
        ];
        assert_eq!(aggregate(&children), Status::Failure);
    }
}
