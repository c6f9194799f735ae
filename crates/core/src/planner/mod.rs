//! Run planning.
//!
//! Compares a scanned source tree against tracked state and decides, per
//! source file and per orphaned output, exactly one action. Planning is a
//! pure function of its inputs; it touches no filesystem and no database,
//! which is what makes the dry-run mode exact and the rules testable
//! without fixtures.

mod types;

pub use types::{Action, ChangedField, Plan, PlanItem, PlanOptions, Reason};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::paths::{replace_extension, sanitize_rel_path, stem_of};
use crate::scanner::{Fingerprint, SourceFile};
use crate::state::{DestState, StateProvider};

/// Plans one run.
///
/// Sources are processed in relative-path order so plans are reproducible.
/// Every source yields exactly one item; every tracked fingerprint no
/// current source claims yields at most one prune or hold item.
pub fn plan(
    mut sources: Vec<SourceFile>,
    provider: &dyn StateProvider,
    opts: &PlanOptions,
    now: DateTime<Utc>,
) -> Plan {
    sources.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    let mut items = Vec::with_capacity(sources.len());
    let mut claimed: HashSet<Fingerprint> = HashSet::new();
    let mut reappeared = Vec::new();

    for source in sources {
        let item = plan_source(source, provider, opts, &mut claimed);
        if let Some(fp) = &item.fingerprint {
            if provider.get(fp).is_some_and(|s| s.missing_since.is_some()) {
                reappeared.push(fp.clone());
            }
        }
        items.push(item);
    }

    // Everything tracked but unclaimed is missing from the source tree.
    // Rename and fingerprint-change handling claim their old records above,
    // so a moved file never looks prunable.
    let mut missing: Vec<Fingerprint> = provider
        .tracked_fingerprints()
        .into_iter()
        .filter(|fp| !claimed.contains(fp))
        .collect();
    missing.sort();

    if opts.prune {
        for fp in &missing {
            let Some(state) = provider.get(fp) else {
                continue;
            };
            items.push(plan_orphan(fp, state, opts, now));
        }
    }

    debug!(
        items = items.len(),
        missing = missing.len(),
        "planning complete"
    );

    Plan {
        items,
        missing,
        reappeared,
    }
}

fn plan_source(
    source: SourceFile,
    provider: &dyn StateProvider,
    opts: &PlanOptions,
    claimed: &mut HashSet<Fingerprint>,
) -> PlanItem {
    if opts.fingerprinting && source.fingerprint.is_none() {
        let mut item = PlanItem::new(Action::Hold, Reason::Unreadable);
        item.source = Some(source);
        return item;
    }

    // Resolve which fingerprint identifies this source for state lookup.
    // Without fingerprinting the path is the identity.
    let fingerprint = if opts.fingerprinting {
        source.fingerprint.clone()
    } else {
        provider.fingerprint_for_path(&source.rel_path).cloned()
    };

    if let Some(fp) = &fingerprint {
        if let Some(state) = provider.get(fp) {
            claimed.insert(fp.clone());
            return plan_known(source, fp.clone(), state, opts);
        }
    }

    // Fingerprint unknown. The same path may have carried different audio
    // before; if so this is a content change, not a brand new file.
    if opts.fingerprinting {
        if let Some(prev_fp) = provider.fingerprint_for_path(&source.rel_path) {
            if let Some(prev_state) = provider.get(prev_fp) {
                claimed.insert(prev_fp.clone());
                return plan_content_change(source, fingerprint, prev_fp.clone(), prev_state, opts);
            }
        }
    }

    // A provenance-less output already sitting at the expected location can
    // be adopted instead of re-encoded.
    if opts.retag_legacy {
        let stem = sanitize_rel_path(stem_of(&source.rel_path));
        if let Some(legacy_path) = provider.legacy_dest_for(&stem) {
            let mut item = PlanItem::new(Action::Retag, Reason::LegacyOutput);
            item.dest_rel_path = Some(legacy_path.to_string());
            item.fingerprint = fingerprint;
            item.source = Some(source);
            return item;
        }
    }

    let mut item = PlanItem::new(Action::Convert, Reason::New);
    item.fingerprint = fingerprint;
    item.source = Some(source);
    item
}

/// The source's content is already tracked; decide between skip, rename,
/// tag sync and re-convert.
fn plan_known(
    source: SourceFile,
    fp: Fingerprint,
    state: &DestState,
    opts: &PlanOptions,
) -> PlanItem {
    let mut changed = Vec::new();
    if state.quality != opts.quality.spec() {
        changed.push(ChangedField::Quality);
    }
    if state.encoder_id != opts.encoder_id {
        changed.push(ChangedField::Encoder);
    }
    let mut metadata_changed = Vec::new();
    if state.size.is_some_and(|s| s != source.size) {
        metadata_changed.push(ChangedField::Size);
    }
    if state.mtime_ns.is_some_and(|m| m != source.mtime_ns) {
        metadata_changed.push(ChangedField::Mtime);
    }

    if !changed.is_empty() {
        changed.extend(metadata_changed);
        changed.sort();
        return convert_over(source, fp, state, opts, Reason::Changed(changed));
    }

    if !metadata_changed.is_empty() {
        // Same audio, same settings, but the file was touched. When the
        // tags moved too, rewrite only the tags; otherwise honor the
        // metadata change with a full re-convert.
        if opts.sync_tags
            && source.tags_digest.is_some()
            && source.tags_digest != state.tags_digest
        {
            let mut item = PlanItem::new(Action::SyncTags, Reason::TagsChanged);
            item.dest_rel_path = Some(state.dest_rel_path.clone());
            item.fingerprint = Some(fp);
            item.source = Some(source);
            return item;
        }
        metadata_changed.sort();
        return convert_over(source, fp, state, opts, Reason::Changed(metadata_changed));
    }

    if opts.detect_renames && source.rel_path != state.source_rel_path {
        let mut item = PlanItem::new(
            Action::Rename,
            Reason::Renamed {
                from: state.source_rel_path.clone(),
            },
        );
        item.rename_from = Some(state.dest_rel_path.clone());
        item.fingerprint = Some(fp);
        item.source = Some(source);
        return item;
    }

    let mut item = PlanItem::new(Action::Skip, Reason::UpToDate);
    item.dest_rel_path = Some(state.dest_rel_path.clone());
    item.fingerprint = Some(fp);
    item.source = Some(source);
    item
}

/// Same path, different audio. Re-convert over the previous output and
/// retire the old record.
fn plan_content_change(
    source: SourceFile,
    fingerprint: Option<Fingerprint>,
    prev_fp: Fingerprint,
    prev_state: &DestState,
    opts: &PlanOptions,
) -> PlanItem {
    let mut changed = vec![ChangedField::Fingerprint];
    if prev_state.size.is_some_and(|s| s != source.size) {
        changed.push(ChangedField::Size);
    }
    if prev_state.mtime_ns.is_some_and(|m| m != source.mtime_ns) {
        changed.push(ChangedField::Mtime);
    }
    if prev_state.quality != opts.quality.spec() {
        changed.push(ChangedField::Quality);
    }
    if prev_state.encoder_id != opts.encoder_id {
        changed.push(ChangedField::Encoder);
    }
    changed.sort();

    let mut item = convert_over(source, prev_fp.clone(), prev_state, opts, Reason::Changed(changed));
    item.fingerprint = fingerprint;
    item.supersedes = Some(prev_fp);
    item
}

/// Builds a convert that replaces an existing output. The prior path is
/// kept unless the target format changed its extension; either way the
/// prior file is gone after the convert lands.
fn convert_over(
    source: SourceFile,
    fp: Fingerprint,
    state: &DestState,
    opts: &PlanOptions,
    reason: Reason,
) -> PlanItem {
    let target_ext = opts.quality.format.extension();
    let new_dest = replace_extension(&state.dest_rel_path, target_ext);

    let mut item = PlanItem::new(Action::Convert, reason);
    if new_dest != state.dest_rel_path {
        item.stale_dest_rel_path = Some(state.dest_rel_path.clone());
    }
    item.dest_rel_path = Some(new_dest);
    item.fingerprint = Some(fp);
    item.source = Some(source);
    item
}

fn plan_orphan(
    fp: &Fingerprint,
    state: &DestState,
    opts: &PlanOptions,
    now: DateTime<Utc>,
) -> PlanItem {
    // Without a recorded clock (index-backed state) only a zero grace
    // period prunes.
    let expired = match state.missing_since {
        Some(since) => now - since >= opts.prune_grace,
        None => opts.prune_grace.is_zero(),
    };

    let mut item = if expired {
        PlanItem::new(Action::Prune, Reason::SourceRemoved)
    } else {
        PlanItem::new(
            Action::Hold,
            Reason::GracePeriod {
                since: state.missing_since,
            },
        )
    };
    item.dest_rel_path = Some(state.dest_rel_path.clone());
    item.fingerprint = Some(fp.clone());
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Quality, TargetFormat};
    use crate::state::DestState;
    use chrono::Duration;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct StubProvider {
        states: HashMap<Fingerprint, DestState>,
        paths: HashMap<String, Fingerprint>,
        legacy: HashMap<String, String>,
    }

    impl StubProvider {
        fn empty() -> Self {
            Self {
                states: HashMap::new(),
                paths: HashMap::new(),
                legacy: HashMap::new(),
            }
        }

        fn with(mut self, fp: &Fingerprint, state: DestState) -> Self {
            self.paths
                .insert(state.source_rel_path.clone(), fp.clone());
            self.states.insert(fp.clone(), state);
            self
        }
    }

    impl StateProvider for StubProvider {
        fn get(&self, fingerprint: &Fingerprint) -> Option<&DestState> {
            self.states.get(fingerprint)
        }

        fn fingerprint_for_path(&self, rel_path: &str) -> Option<&Fingerprint> {
            self.paths.get(rel_path)
        }

        fn tracked_fingerprints(&self) -> Vec<Fingerprint> {
            self.states.keys().cloned().collect()
        }

        fn legacy_dest_for(&self, stem: &str) -> Option<&str> {
            self.legacy.get(stem).map(String::as_str)
        }

        fn known_dest_paths(&self) -> HashSet<String> {
            self.states
                .values()
                .map(|s| s.dest_rel_path.clone())
                .collect()
        }
    }

    fn fp(seed: u8) -> Fingerprint {
        Fingerprint::new(format!("{:02x}", seed).repeat(16))
    }

    fn source(rel: &str, fingerprint: Option<Fingerprint>) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/music").join(rel),
            rel_path: rel.to_string(),
            size: 1000,
            mtime_ns: 500,
            fingerprint,
            tags_digest: Some("tags-v1".to_string()),
        }
    }

    fn state(source_rel: &str, dest_rel: &str) -> DestState {
        DestState {
            size: Some(1000),
            mtime_ns: Some(500),
            quality: "ogg-192".to_string(),
            encoder_id: "ffmpeg-1".to_string(),
            tags_digest: Some("tags-v1".to_string()),
            source_rel_path: source_rel.to_string(),
            dest_rel_path: dest_rel.to_string(),
            missing_since: None,
        }
    }

    fn options() -> PlanOptions {
        PlanOptions {
            quality: Quality::new(TargetFormat::OggVorbis, 192),
            encoder_id: "ffmpeg-1".to_string(),
            fingerprinting: true,
            detect_renames: true,
            retag_legacy: false,
            sync_tags: true,
            prune: false,
            prune_grace: Duration::days(7),
        }
    }

    #[test]
    fn test_unknown_source_converts_as_new() {
        let provider = StubProvider::empty();
        let plan = plan(
            vec![source("a/track.flac", Some(fp(1)))],
            &provider,
            &options(),
            Utc::now(),
        );

        assert_eq!(plan.items.len(), 1);
        let item = &plan.items[0];
        assert_eq!(item.action, Action::Convert);
        assert_eq!(item.reason, Reason::New);
        // Path resolution happens after planning.
        assert!(item.dest_rel_path.is_none());
    }

    #[test]
    fn test_unchanged_source_skips() {
        let provider =
            StubProvider::empty().with(&fp(1), state("a/track.flac", "a/track.ogg"));
        let plan = plan(
            vec![source("a/track.flac", Some(fp(1)))],
            &provider,
            &options(),
            Utc::now(),
        );

        assert_eq!(plan.items[0].action, Action::Skip);
        assert_eq!(plan.items[0].reason, Reason::UpToDate);
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_quality_change_reconverts_with_field_list() {
        let provider =
            StubProvider::empty().with(&fp(1), state("a/track.flac", "a/track.ogg"));
        let mut opts = options();
        opts.quality = Quality::new(TargetFormat::OggVorbis, 256);

        let plan = plan(
            vec![source("a/track.flac", Some(fp(1)))],
            &provider,
            &opts,
            Utc::now(),
        );

        let item = &plan.items[0];
        assert_eq!(item.action, Action::Convert);
        assert_eq!(item.reason, Reason::Changed(vec![ChangedField::Quality]));
        assert_eq!(item.dest_rel_path.as_deref(), Some("a/track.ogg"));
    }

    #[test]
    fn test_format_change_replaces_old_output() {
        let provider =
            StubProvider::empty().with(&fp(1), state("a/track.flac", "a/track.ogg"));
        let mut opts = options();
        opts.quality = Quality::new(TargetFormat::Opus, 128);

        let plan = plan(
            vec![source("a/track.flac", Some(fp(1)))],
            &provider,
            &opts,
            Utc::now(),
        );

        let item = &plan.items[0];
        assert_eq!(item.action, Action::Convert);
        assert_eq!(item.dest_rel_path.as_deref(), Some("a/track.opus"));
        assert_eq!(item.stale_dest_rel_path.as_deref(), Some("a/track.ogg"));
    }

    #[test]
    fn test_touched_file_with_new_tags_syncs_tags_only() {
        let provider =
            StubProvider::empty().with(&fp(1), state("a/track.flac", "a/track.ogg"));
        let mut src = source("a/track.flac", Some(fp(1)));
        src.mtime_ns = 999;
        src.tags_digest = Some("tags-v2".to_string());

        let plan = plan(vec![src], &provider, &options(), Utc::now());

        let item = &plan.items[0];
        assert_eq!(item.action, Action::SyncTags);
        assert_eq!(item.reason, Reason::TagsChanged);
        assert_eq!(item.dest_rel_path.as_deref(), Some("a/track.ogg"));
    }

    #[test]
    fn test_touched_file_with_same_tags_reconverts() {
        let provider =
            StubProvider::empty().with(&fp(1), state("a/track.flac", "a/track.ogg"));
        let mut src = source("a/track.flac", Some(fp(1)));
        src.size = 2000;
        src.mtime_ns = 999;

        let plan = plan(vec![src], &provider, &options(), Utc::now());

        let item = &plan.items[0];
        assert_eq!(item.action, Action::Convert);
        assert_eq!(
            item.reason,
            Reason::Changed(vec![ChangedField::Size, ChangedField::Mtime])
        );
    }

    #[test]
    fn test_sync_tags_disabled_falls_back_to_convert() {
        let provider =
            StubProvider::empty().with(&fp(1), state("a/track.flac", "a/track.ogg"));
        let mut opts = options();
        opts.sync_tags = false;
        let mut src = source("a/track.flac", Some(fp(1)));
        src.mtime_ns = 999;
        src.tags_digest = Some("tags-v2".to_string());

        let plan = plan(vec![src], &provider, &opts, Utc::now());
        assert_eq!(plan.items[0].action, Action::Convert);
    }

    #[test]
    fn test_moved_source_renames_instead_of_converting() {
        let provider =
            StubProvider::empty().with(&fp(1), state("old/name.flac", "old/name.ogg"));
        let plan = plan(
            vec![source("new/name.flac", Some(fp(1)))],
            &provider,
            &options(),
            Utc::now(),
        );

        let item = &plan.items[0];
        assert_eq!(item.action, Action::Rename);
        assert_eq!(
            item.reason,
            Reason::Renamed {
                from: "old/name.flac".to_string()
            }
        );
        assert_eq!(item.rename_from.as_deref(), Some("old/name.ogg"));
        // New destination assigned by path resolution later.
        assert!(item.dest_rel_path.is_none());
        // The moved record is claimed; never reported missing.
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_rename_detection_disabled_skips_moved_source() {
        let provider =
            StubProvider::empty().with(&fp(1), state("old/name.flac", "old/name.ogg"));
        let mut opts = options();
        opts.detect_renames = false;

        let plan = plan(
            vec![source("new/name.flac", Some(fp(1)))],
            &provider,
            &opts,
            Utc::now(),
        );
        assert_eq!(plan.items[0].action, Action::Skip);
    }

    #[test]
    fn test_rewritten_content_at_known_path_supersedes_old_record() {
        let provider =
            StubProvider::empty().with(&fp(1), state("a/track.flac", "a/track.ogg"));
        let plan = plan(
            vec![source("a/track.flac", Some(fp(2)))],
            &provider,
            &options(),
            Utc::now(),
        );

        let item = &plan.items[0];
        assert_eq!(item.action, Action::Convert);
        assert!(matches!(&item.reason, Reason::Changed(fields)
            if fields.contains(&ChangedField::Fingerprint)));
        assert_eq!(item.fingerprint, Some(fp(2)));
        assert_eq!(item.supersedes, Some(fp(1)));
        assert_eq!(item.dest_rel_path.as_deref(), Some("a/track.ogg"));
        // The old record is being replaced, not orphaned.
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_unreadable_source_holds() {
        let provider = StubProvider::empty();
        let plan = plan(
            vec![source("bad.flac", None)],
            &provider,
            &options(),
            Utc::now(),
        );

        assert_eq!(plan.items[0].action, Action::Hold);
        assert_eq!(plan.items[0].reason, Reason::Unreadable);
    }

    #[test]
    fn test_legacy_output_adopted_when_enabled() {
        let mut provider = StubProvider::empty();
        provider
            .legacy
            .insert("a/track".to_string(), "a/track.mp3".to_string());
        let mut opts = options();
        opts.retag_legacy = true;

        let plan = plan(
            vec![source("a/track.flac", Some(fp(1)))],
            &provider,
            &opts,
            Utc::now(),
        );

        let item = &plan.items[0];
        assert_eq!(item.action, Action::Retag);
        assert_eq!(item.reason, Reason::LegacyOutput);
        assert_eq!(item.dest_rel_path.as_deref(), Some("a/track.mp3"));
    }

    #[test]
    fn test_legacy_output_ignored_when_disabled() {
        let mut provider = StubProvider::empty();
        provider
            .legacy
            .insert("a/track".to_string(), "a/track.mp3".to_string());

        let plan = plan(
            vec![source("a/track.flac", Some(fp(1)))],
            &provider,
            &options(),
            Utc::now(),
        );
        assert_eq!(plan.items[0].action, Action::Convert);
        assert_eq!(plan.items[0].reason, Reason::New);
    }

    #[test]
    fn test_missing_source_reported_and_held_within_grace() {
        let mut s = state("gone.flac", "gone.ogg");
        s.missing_since = Some(Utc::now() - Duration::days(1));
        let provider = StubProvider::empty().with(&fp(1), s);
        let mut opts = options();
        opts.prune = true;

        let plan = plan(vec![], &provider, &opts, Utc::now());

        assert_eq!(plan.missing, vec![fp(1)]);
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].action, Action::Hold);
        assert!(matches!(
            plan.items[0].reason,
            Reason::GracePeriod { since: Some(_) }
        ));
    }

    #[test]
    fn test_missing_source_pruned_after_grace() {
        let mut s = state("gone.flac", "gone.ogg");
        s.missing_since = Some(Utc::now() - Duration::days(8));
        let provider = StubProvider::empty().with(&fp(1), s);
        let mut opts = options();
        opts.prune = true;

        let plan = plan(vec![], &provider, &opts, Utc::now());

        assert_eq!(plan.items[0].action, Action::Prune);
        assert_eq!(plan.items[0].reason, Reason::SourceRemoved);
        assert_eq!(plan.items[0].dest_rel_path.as_deref(), Some("gone.ogg"));
    }

    #[test]
    fn test_prune_disabled_still_reports_missing() {
        let provider = StubProvider::empty().with(&fp(1), state("gone.flac", "gone.ogg"));
        let plan = plan(vec![], &provider, &options(), Utc::now());

        assert_eq!(plan.missing, vec![fp(1)]);
        assert!(plan.items.is_empty());
    }

    #[test]
    fn test_reappeared_source_listed_for_clock_reset() {
        let mut s = state("back.flac", "back.ogg");
        s.missing_since = Some(Utc::now() - Duration::days(2));
        let provider = StubProvider::empty().with(&fp(1), s);

        let plan = plan(
            vec![source("back.flac", Some(fp(1)))],
            &provider,
            &options(),
            Utc::now(),
        );

        assert_eq!(plan.reappeared, vec![fp(1)]);
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_plan_without_fingerprinting_uses_path_identity() {
        let provider =
            StubProvider::empty().with(&fp(1), state("a/track.flac", "a/track.ogg"));
        let mut opts = options();
        opts.fingerprinting = false;

        // Fingerprint absent from the scan entirely.
        let mut unchanged = source("a/track.flac", None);
        unchanged.tags_digest = None;
        let mut touched = source("a/track.flac", None);
        touched.tags_digest = None;
        touched.size = 1234;

        let p = plan(vec![unchanged], &provider, &opts, Utc::now());
        assert_eq!(p.items[0].action, Action::Skip);

        let p = plan(vec![touched], &provider, &opts, Utc::now());
        assert_eq!(p.items[0].action, Action::Convert);
    }

    #[test]
    fn test_items_ordered_by_source_path() {
        let provider = StubProvider::empty();
        let plan = plan(
            vec![
                source("b.flac", Some(fp(2))),
                source("a.flac", Some(fp(1))),
            ],
            &provider,
            &options(),
            Utc::now(),
        );

        let rels: Vec<&str> = plan
            .items
            .iter()
            .map(|i| i.source.as_ref().unwrap().rel_path.as_str())
            .collect();
        assert_eq!(rels, vec!["a.flac", "b.flac"]);
    }
}
