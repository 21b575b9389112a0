//! Decides which mempool transactions a client still needs, given the
//! (possibly truncated) ids it already holds.

/// Returns the sorted `items` the client should receive.
///
/// An item is withheld only when it starts with an `exclude` entry that
/// prefixes no other item. An entry prefixing several items is ambiguous, so
/// all of them are sent.
pub fn exclude_known(items: &[String], exclude: &[String]) -> Vec<String> {
    let mut items = items.to_vec();
    items.sort();
    let mut exclude = exclude.to_vec();
    exclude.sort();

    let matched = match_entries(&items, &exclude);

    let mut match_counts = vec![0usize; exclude.len()];
    for entry in matched.iter().flatten() {
        match_counts[*entry] += 1;
    }

    items
        .into_iter()
        .zip(matched)
        .filter(|(_, entry)| !matches!(entry, Some(entry) if match_counts[*entry] == 1))
        .map(|(item, _)| item)
        .collect()
}

/// Merge pass over both sorted lists: the exclude entry each item starts with.
fn match_entries(items: &[String], exclude: &[String]) -> Vec<Option<usize>> {
    let mut cursor = 0;
    items
        .iter()
        .map(|item| {
            while cursor < exclude.len() && precedes(&exclude[cursor], item) {
                cursor += 1;
            }
            (cursor < exclude.len() && item.starts_with(exclude[cursor].as_str())).then_some(cursor)
        })
        .collect()
}

/// `exclude < item`, with `item` cut to the shorter of the two lengths.
fn precedes(exclude: &str, item: &str) -> bool {
    let len = exclude.len().min(item.len());
    exclude.as_bytes() < &item.as_bytes()[..len]
}
