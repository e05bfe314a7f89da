use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use maat::memory::clock::ManualClock;
use maat::memory::fusion::Provenance;
use maat::memory::{EngineOptions, MemoryEngine, MemoryError};

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

fn open_engine(dir: &std::path::Path) -> (MemoryEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = MemoryEngine::open(
        dir,
        EngineOptions {
            clock: clock.clone(),
            ..EngineOptions::default()
        },
    )
    .unwrap();
    (engine, clock)
}

// =============================================================
// Episodic Store Tests
// =============================================================

#[test]
fn episodic_blank_text_is_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());

    assert_eq!(engine.episodic().add("user", "   ", 1.0).unwrap(), None);
    assert_eq!(engine.episodic().count().unwrap(), 0);
}

#[test]
fn episodic_decay_multiplies_every_priority_exactly() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, clock) = open_engine(tmp.path());
    let ep = engine.episodic();

    ep.add("user", "first", 1.0).unwrap();
    clock.advance(Duration::seconds(1));
    ep.add("user", "second", 2.0).unwrap();
    clock.advance(Duration::seconds(1));
    ep.add("user", "third", 0.5).unwrap();

    assert_eq!(ep.decay(0.5).unwrap(), 3);

    let rows = ep.recent(10).unwrap();
    let priorities: Vec<(String, f64)> = rows.into_iter().map(|r| (r.text, r.priority)).collect();
    assert_eq!(
        priorities,
        vec![
            ("third".to_string(), 0.25),
            ("second".to_string(), 1.0),
            ("first".to_string(), 0.5),
        ]
    );
}

#[test]
fn episodic_decay_rejects_bad_factors() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());

    assert!(matches!(
        engine.decay_episodic(-0.1),
        Err(MemoryError::InvalidFactor(_))
    ));
    assert!(matches!(
        engine.decay_episodic(f64::NAN),
        Err(MemoryError::InvalidFactor(_))
    ));
}

#[test]
fn episodic_recall_ranks_by_priority_then_recency() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, clock) = open_engine(tmp.path());
    let ep = engine.episodic();

    ep.add("user", "I like green tea", 2.0).unwrap();
    clock.advance(Duration::minutes(5));
    ep.add("user", "I like green tea a lot", 0.5).unwrap();
    clock.advance(Duration::minutes(5));
    ep.add("user", "Green TEA again", 0.5).unwrap();

    let hits = ep.recall("green tea", 5).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].priority, 2.0);
    // equal priority: newer first
    assert_eq!(hits[1].text, "Green TEA again");
    assert_eq!(hits[2].text, "I like green tea a lot");
}

#[test]
fn episodic_recall_without_match_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    engine.episodic().add("user", "hello", 1.0).unwrap();

    assert!(engine.episodic().recall("xyz", 5).unwrap().is_empty());
}

#[test]
fn episodic_recall_treats_percent_and_underscore_literally() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    engine.episodic().add("user", "rated it 100 points", 1.0).unwrap();
    engine.episodic().add("user", "battery at 100% again", 1.0).unwrap();

    let hits = engine.episodic().recall("100%", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "battery at 100% again");
    assert!(engine.episodic().recall("_", 5).unwrap().is_empty());
}

#[test]
fn episodic_recall_folds_umlaut_case() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    engine.episodic().add("user", "Über das Wetter reden wir morgen", 1.0).unwrap();

    assert_eq!(engine.episodic().recall("über", 5).unwrap().len(), 1);
    assert_eq!(engine.episodic().recall("WETTER", 5).unwrap().len(), 1);
}

// =============================================================
// Semantic Store Tests
// =============================================================

#[test]
fn semantic_readd_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    let sem = engine.semantic();

    assert!(sem.add("Rust has no garbage collector").unwrap());
    assert!(!sem.add("Rust has no garbage collector").unwrap());
    assert!(!sem.add("  ").unwrap());
    assert_eq!(sem.count().unwrap(), 1);
}

#[test]
fn semantic_search_scores_exact_text_highest() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    let sem = engine.semantic();

    sem.add("the quick brown fox").unwrap();
    sem.add("completely unrelated words here").unwrap();
    sem.add("zebra").unwrap();

    let hits = sem.search("the quick brown fox", 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.text, "the quick brown fox");
    assert_eq!(hits[0].score, 1.0);
    assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
    assert!(hits[0].score >= hits[1].score);
}

// =============================================================
// Long-Term Store Tests
// =============================================================

#[test]
fn long_term_add_derives_keywords_and_category() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    let lt = engine.long_term();

    let id = lt.add("user", "projekt python idee").unwrap().unwrap();
    let rec = lt.get(id).unwrap().unwrap();
    assert_eq!(rec.keywords, "projekt,python,idee");
    assert_eq!(rec.category, "technik");
    assert_eq!(rec.priority, 1.0);
    assert_eq!(rec.compressed, "projekt python idee");

    assert_eq!(lt.add("user", "\n\t").unwrap(), None);
}

#[test]
fn long_term_recall_collapses_duplicate_compressed_text() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, clock) = open_engine(tmp.path());
    let lt = engine.long_term();

    lt.add("user", "walks walks in the park").unwrap();
    clock.advance(Duration::seconds(1));
    lt.add("user", "walks in the park").unwrap();
    clock.advance(Duration::seconds(1));
    lt.add("user", "Walks in the rain").unwrap();

    let hits = engine.search_long_term("walks", 10).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].content, "Walks in the rain");
}

#[test]
fn forget_deletes_only_long_term_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());

    engine.store("user", "my secret password is hunter2").unwrap();
    engine.store("user", "the weather is nice today").unwrap();

    assert_eq!(engine.forget("hunter2").unwrap(), 1);
    assert_eq!(engine.forget("   ").unwrap(), 0);

    let stats = engine.stats().unwrap();
    assert_eq!(stats.long_term, 1);
    assert_eq!(stats.episodic, 2);
}

#[test]
fn forget_wildcard_characters_match_literally() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    engine.long_term().add("user", "my cat is called Mia").unwrap();
    engine.long_term().add("user", "python scripts at work").unwrap();

    assert_eq!(engine.forget("_").unwrap(), 0);
    assert_eq!(engine.forget("%").unwrap(), 0);
    assert_eq!(engine.long_term().count().unwrap(), 2);
}

#[test]
fn long_term_search_folds_umlaut_case() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    engine.long_term().add("user", "Übermorgen Ärger im Büro").unwrap();

    let hits = engine.long_term().search_keyword("ärger", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(engine.forget("ÜBERMORGEN").unwrap(), 1);
}

#[test]
fn narrative_is_chronological() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, clock) = open_engine(tmp.path());
    assert_eq!(engine.narrative(20).unwrap(), None);

    engine.long_term().add("user", "good morning").unwrap();
    clock.advance(Duration::minutes(1));
    engine.long_term().add("assistant", "good morning to you").unwrap();

    let text = engine.narrative(20).unwrap().unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("user: good morning"));
    assert!(lines[1].ends_with("assistant: good morning to you"));
}

#[test]
fn legacy_long_term_file_gains_priority_column() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let conn = rusqlite::Connection::open(tmp.path().join("long_term.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE ltm (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts REAL, role TEXT, content TEXT,
                compressed TEXT, keywords TEXT, category TEXT
            );
            INSERT INTO ltm (ts, role, content, compressed, keywords, category)
            VALUES (1700000000.0, 'user', 'old python notes', 'old python notes', 'python,notes,old', 'technik');",
        )
        .unwrap();
    }

    let (engine, _) = open_engine(tmp.path());
    let rec = engine.long_term().get(1).unwrap().unwrap();
    assert_eq!(rec.priority, 1.0);
    assert_eq!(rec.content, "old python notes");

    assert_eq!(engine.reinforce("python", 2.0).unwrap(), 1);
    assert_eq!(engine.long_term().get(1).unwrap().unwrap().priority, 2.0);
}

// =============================================================
// Brain Fusion Tests
// =============================================================

#[test]
fn fusion_writes_knowledge_only_for_statements() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());

    engine.fusion().store("user", "Hi").unwrap();
    engine.fusion().store("user", "I really enjoy long walks").unwrap();
    engine.fusion().store("user", "What time is it?").unwrap();

    assert_eq!(engine.episodic().count().unwrap(), 3);
    assert_eq!(engine.semantic().count().unwrap(), 1);
    assert!(engine.semantic().contains("I really enjoy long walks").unwrap());
}

#[test]
fn fusion_recall_puts_episodes_first_and_dedups() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());

    engine.store("user", "I really enjoy long walks").unwrap();
    engine.semantic().add("Tea is best without sugar").unwrap();

    let hits = engine.recall("walks", 5).unwrap();
    assert_eq!(hits[0].provenance, Provenance::Episodic);
    assert_eq!(hits[0].text, "I really enjoy long walks");
    // the same text in semantic memory is not repeated
    assert_eq!(
        hits.iter()
            .filter(|h| h.text == "I really enjoy long walks")
            .count(),
        1
    );
    assert!(hits.iter().any(|h| h.provenance == Provenance::Knowledge));
    assert!(hits.len() <= 5);
}

#[test]
fn remember_forces_all_three_stores() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());

    assert!(engine.remember("Hi").unwrap());
    assert!(!engine.remember("  ").unwrap());

    assert!(engine.semantic().contains("Hi").unwrap());
    let last = engine.recent_episodes(1).unwrap();
    assert_eq!(last[0].role, "forced");
    assert_eq!(engine.long_term().count().unwrap(), 1);
}

#[test]
fn assemble_context_lists_recalled_texts() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    assert!(engine.assemble_context("walks", 5).unwrap().is_none());

    engine.store("user", "I really enjoy long walks").unwrap();
    let msg = engine.assemble_context("walks", 5).unwrap().unwrap();
    assert_eq!(msg.role, "system");
    assert!(msg.content.contains("• I really enjoy long walks"));
}

// =============================================================
// Context Anchor Tests
// =============================================================

#[test]
fn reinforce_compounds_multiplicatively() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    let id = engine.long_term().add("user", "projekt python idee").unwrap().unwrap();

    assert_eq!(engine.reinforce("python", 1.1).unwrap(), 1);
    let p = engine.long_term().get(id).unwrap().unwrap().priority;
    assert!((p - 1.1).abs() < 1e-9);

    engine.reinforce("PYTHON", 1.1).unwrap();
    let p = engine.long_term().get(id).unwrap().unwrap().priority;
    assert!((p - 1.21).abs() < 1e-9);
}

#[test]
fn reinforce_is_clamped_at_max_priority() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    let id = engine.long_term().add("user", "projekt python idee").unwrap().unwrap();
    engine.long_term().set_priority(id, 9.5).unwrap();

    engine.reinforce("python", 1.1).unwrap();
    assert_eq!(engine.long_term().get(id).unwrap().unwrap().priority, 10.0);
}

#[test]
fn reinforce_never_lowers_a_priority_above_the_ceiling() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    let id = engine.long_term().add("user", "projekt python idee").unwrap().unwrap();
    engine.long_term().set_priority(id, 50.0).unwrap();

    engine.reinforce("python", 1.1).unwrap();
    assert_eq!(engine.long_term().get(id).unwrap().unwrap().priority, 50.0);
}

#[test]
fn reinforce_underscore_matches_no_keywords() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    engine.long_term().add("user", "projekt python idee").unwrap();

    assert_eq!(engine.reinforce("_", 2.0).unwrap(), 0);
}

#[test]
fn reinforce_with_blank_keyword_touches_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    let id = engine.long_term().add("user", "projekt python idee").unwrap().unwrap();

    assert_eq!(engine.reinforce("  ", 1.1).unwrap(), 0);
    assert_eq!(engine.long_term().get(id).unwrap().unwrap().priority, 1.0);
    assert!(matches!(
        engine.reinforce("python", f64::INFINITY),
        Err(MemoryError::InvalidFactor(_))
    ));
}

#[test]
fn weaken_all_scales_every_record() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    let a = engine.long_term().add("user", "alpha beta gamma").unwrap().unwrap();
    let b = engine.long_term().add("user", "delta epsilon").unwrap().unwrap();

    assert_eq!(engine.weaken_all(0.5).unwrap(), 2);
    assert_eq!(engine.long_term().get(a).unwrap().unwrap().priority, 0.5);
    assert_eq!(engine.long_term().get(b).unwrap().unwrap().priority, 0.5);
}

// =============================================================
// Engine Tests
// =============================================================

#[test]
fn clear_empties_every_store() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, _) = open_engine(tmp.path());
    engine.store("user", "I really enjoy long walks").unwrap();

    engine.clear().unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!((stats.episodic, stats.semantic, stats.long_term), (0, 0, 0));
}

#[test]
fn stores_persist_across_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let (engine, _) = open_engine(tmp.path());
        engine.store("user", "I really enjoy long walks").unwrap();
    }
    let (engine, _) = open_engine(tmp.path());
    let stats = engine.stats().unwrap();
    assert_eq!((stats.episodic, stats.semantic, stats.long_term), (1, 1, 1));
}

#[test]
fn backup_is_written_once_per_day() {
    let tmp = tempfile::tempdir().unwrap();
    let (engine, clock) = open_engine(tmp.path());
    engine.long_term().add("user", "keep me safe").unwrap();
    let dir = tmp.path().join("backups");

    let first = engine.backup(&dir).unwrap();
    let path = match first {
        maat::memory::backup::BackupOutcome::Created(p) => p,
        other => panic!("expected a new backup, got {other:?}"),
    };
    assert!(path.exists());
    assert!(path.file_name().unwrap().to_string_lossy().starts_with("ltm_"));

    assert!(matches!(
        engine.backup(&dir).unwrap(),
        maat::memory::backup::BackupOutcome::AlreadyExists(_)
    ));

    clock.advance(Duration::days(1));
    assert!(matches!(
        engine.backup(&dir).unwrap(),
        maat::memory::backup::BackupOutcome::Created(_)
    ));
}
