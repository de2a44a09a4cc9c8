use std::time::Duration;

use crate::models::{JobAction, OperationCategory};

const PULL_CAPABILITIES: &[JobAction] = &[
    JobAction::Start,
    JobAction::Status,
    JobAction::Cancel,
    JobAction::ListActive,
];
const BUILD_CAPABILITIES: &[JobAction] = &[
    JobAction::Start,
    JobAction::Status,
    JobAction::Cancel,
    JobAction::ListActive,
];
const ISO_CAPABILITIES: &[JobAction] = &[JobAction::Start, JobAction::Status, JobAction::Cancel];

const FAST_POLL: Duration = Duration::from_millis(1000);
const SLOW_POLL: Duration = Duration::from_millis(2000);
const SHORT_GRACE: Duration = Duration::from_millis(5000);
const LONG_GRACE: Duration = Duration::from_millis(10_000);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CategoryDescriptor {
    pub category: OperationCategory,
    pub display_name: &'static str,
    pub capabilities: &'static [JobAction],
    pub poll_interval: Duration,
    pub grace_window: Duration,
}

impl CategoryDescriptor {
    pub fn supports(&self, action: JobAction) -> bool {
        self.capabilities.contains(&action)
    }
}

const ALL_CATEGORIES: [CategoryDescriptor; 5] = [
    CategoryDescriptor {
        category: OperationCategory::ImagePull,
        display_name: "Container image pull",
        capabilities: PULL_CAPABILITIES,
        poll_interval: FAST_POLL,
        grace_window: SHORT_GRACE,
    },
    CategoryDescriptor {
        category: OperationCategory::ImageBuild,
        display_name: "Container image build",
        capabilities: BUILD_CAPABILITIES,
        poll_interval: SLOW_POLL,
        grace_window: LONG_GRACE,
    },
    CategoryDescriptor {
        category: OperationCategory::LinuxIso,
        display_name: "Linux ISO download",
        capabilities: ISO_CAPABILITIES,
        poll_interval: SLOW_POLL,
        grace_window: SHORT_GRACE,
    },
    CategoryDescriptor {
        category: OperationCategory::WindowsIso,
        display_name: "Windows ISO download",
        capabilities: ISO_CAPABILITIES,
        poll_interval: SLOW_POLL,
        grace_window: SHORT_GRACE,
    },
    CategoryDescriptor {
        category: OperationCategory::CustomIso,
        display_name: "Custom ISO download",
        capabilities: ISO_CAPABILITIES,
        poll_interval: SLOW_POLL,
        grace_window: SHORT_GRACE,
    },
];

pub fn all_categories() -> &'static [CategoryDescriptor] {
    &ALL_CATEGORIES
}

pub fn category_descriptor(category: OperationCategory) -> &'static CategoryDescriptor {
    match category {
        OperationCategory::ImagePull => &ALL_CATEGORIES[0],
        OperationCategory::ImageBuild => &ALL_CATEGORIES[1],
        OperationCategory::LinuxIso => &ALL_CATEGORIES[2],
        OperationCategory::WindowsIso => &ALL_CATEGORIES[3],
        OperationCategory::CustomIso => &ALL_CATEGORIES[4],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_matches_table_position() {
        for descriptor in all_categories() {
            assert_eq!(category_descriptor(descriptor.category), descriptor);
        }
    }

    #[test]
    fn pulls_poll_fastest_and_builds_linger_longest() {
        let pull = category_descriptor(OperationCategory::ImagePull);
        let build = category_descriptor(OperationCategory::ImageBuild);
        let iso = category_descriptor(OperationCategory::WindowsIso);

        assert_eq!(pull.poll_interval, Duration::from_millis(1000));
        assert_eq!(pull.grace_window, Duration::from_millis(5000));
        assert_eq!(build.poll_interval, Duration::from_millis(2000));
        assert_eq!(build.grace_window, Duration::from_millis(10_000));
        assert_eq!(iso.poll_interval, Duration::from_millis(2000));
        assert_eq!(iso.grace_window, Duration::from_millis(5000));
    }

    #[test]
    fn only_container_categories_offer_bulk_listing() {
        let bulk: Vec<_> = all_categories()
            .iter()
            .filter(|descriptor| descriptor.supports(JobAction::ListActive))
            .map(|descriptor| descriptor.category)
            .collect();
        assert_eq!(
            bulk,
            vec![OperationCategory::ImagePull, OperationCategory::ImageBuild]
        );
    }
}
