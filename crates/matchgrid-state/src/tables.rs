//! redb table definitions and key layout for [`crate::RedbEngine`].
//!
//! Sorted sets and hashes are flattened into `&str`-keyed tables with
//! composite keys so that a prefix range scan enumerates one structure:
//!
//! ```text
//! ZSET_SCORES   {set}/{score:020}/{member}  → ()     ordered by score
//! ZSET_MEMBERS  {set}/{member}              → score  point lookups
//! HASHES        {hash}/{field}              → bytes
//! ```

use redb::TableDefinition;

/// Backfill records keyed by backfill id.
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Sorted-set members ordered by score, keyed by `{set}/{score:020}/{member}`.
pub const ZSET_SCORES: TableDefinition<&str, ()> = TableDefinition::new("zset_scores");

/// Current score of each sorted-set member, keyed by `{set}/{member}`.
pub const ZSET_MEMBERS: TableDefinition<&str, i64> = TableDefinition::new("zset_members");

/// Hash field values keyed by `{hash}/{field}`.
pub const HASHES: TableDefinition<&str, &[u8]> = TableDefinition::new("hashes");

/// Prefix shared by every key of one sorted set or hash.
pub fn prefix(name: &str) -> String {
    format!("{name}/")
}

/// Key of a member within a sorted set or a field within a hash.
pub fn member_key(name: &str, member: &str) -> String {
    format!("{name}/{member}")
}

/// Key ordering a sorted-set member by score. The score is shifted into
/// `u64` space and zero-padded so lexicographic order matches numeric order,
/// negative scores included.
pub fn score_key(set: &str, score: i64, member: &str) -> String {
    format!("{set}/{:020}/{member}", order_preserving(score))
}

/// Smallest possible `score_key` for `score` in `set`.
pub fn score_floor(set: &str, score: i64) -> String {
    format!("{set}/{:020}/", order_preserving(score))
}

/// Split a `score_key` (with the set prefix already removed) into score and
/// member.
pub fn split_score_key(rest: &str) -> Option<(i64, &str)> {
    let (digits, member) = rest.split_once('/')?;
    let shifted = digits.parse::<u64>().ok()?;
    Some(((shifted ^ (1 << 63)) as i64, member))
}

fn order_preserving(score: i64) -> u64 {
    (score as u64) ^ (1 << 63)
}
