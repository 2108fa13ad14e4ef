use tracing::trace;

use crate::document::{Main, SectionStatus};

/// Recomputes section status top to bottom. The first section still holding
/// an initialized or loading block becomes `loading` and stops the scan, so
/// no later section can be revealed before it. Safe to call after every
/// block load.
pub fn update_sections_status(main: &Main) {
    for (index, section) in main.sections().iter().enumerate() {
        if section.status() == Some(SectionStatus::Loaded) {
            continue;
        }
        let pending = section
            .blocks()
            .iter()
            .any(|block| block.status().is_pending());
        if pending {
            section.set_status(SectionStatus::Loading);
            trace!(section = index, "section waiting on blocks");
            break;
        }
        section.set_status(SectionStatus::Loaded);
        section.set_visible(true);
    }
}
