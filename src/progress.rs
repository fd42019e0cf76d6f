use crate::catalog::SurahCatalog;
use crate::revision::{span_len, RevisionRange};

/// Compute the next revision chunk after `current`, preserving its length.
///
/// `use_old_to_as_from` selects the suggestion policy: `true` resumes at the
/// previous end ayah (the default for auto-suggestions), `false` starts one
/// past it (legacy behaviour). When the start would fall past the surah's
/// last ayah the chunk rolls over to the next surah at ayah 1; if there is no
/// next surah the result is clamped to the final chunk of the same surah.
/// Returns `None` when the surah cannot be resolved or the catalog is empty.
pub fn compute_next_chunk(
    catalog: &SurahCatalog,
    current: &RevisionRange,
    use_old_to_as_from: bool,
) -> Option<RevisionRange> {
    if catalog.is_empty() {
        return None;
    }
    let surah = catalog.lookup(&current.surah)?;
    let max_ayah = surah.ayah_count as i64;
    let length = span_len(current.from_ayah, current.to_ayah);

    let mut new_from = if use_old_to_as_from {
        current.to_ayah
    } else {
        current.to_ayah.saturating_add(1)
    };
    let mut new_surah = surah;

    if new_from > max_ayah {
        match catalog.next(surah) {
            Some(next) => {
                new_surah = next;
                new_from = 1;
            }
            None => {
                // Last surah of the catalog: cap to its final chunk.
                return Some(RevisionRange::new(
                    surah.name.clone(),
                    max_ayah.saturating_sub(length).saturating_add(1).max(1),
                    max_ayah,
                ));
            }
        }
    }

    let mut new_to = new_from.saturating_add(length.saturating_sub(1));
    let new_max = new_surah.ayah_count as i64;
    if new_to > new_max {
        new_to = new_max;
    }

    Some(RevisionRange::new(new_surah.name.clone(), new_from, new_to))
}
