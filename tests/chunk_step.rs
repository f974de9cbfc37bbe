mod common;

use batch_etl::{
    BatchError,
    core::{
        item::{ItemProcessor, ItemProcessorResult, PassThroughProcessor},
        step::{BatchStatus, SkipPolicy, Step, StepBuilder, StepExecution},
    },
};
use common::{CollectingWriter, ListReader, MockWriter, Person, UpperCaseProcessor, malformed};
use proptest::prelude::*;

fn people(count: usize) -> Vec<Person> {
    (0..count)
        .map(|i| Person::new(&format!("first{}", i), &format!("last{}", i)))
        .collect()
}

#[test]
fn each_chunk_is_one_transaction() {
    common::init_logger();
    let reader = ListReader::of(people(7));
    let mut writer = MockWriter::new();
    writer.expect_open().times(1).returning(|| Ok(()));
    writer.expect_begin().times(3).returning(|| Ok(()));
    writer
        .expect_write()
        .withf(|items| items.len() == 3 || items.len() == 1)
        .times(3)
        .returning(|_| Ok(()));
    writer.expect_commit().times(3).returning(|| Ok(()));
    writer.expect_close().times(1).returning(|| Ok(()));

    let step = StepBuilder::new("step1")
        .chunk(3)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&writer)
        .build()
        .unwrap();
    let mut execution = StepExecution::new(step.get_name());

    step.execute(&mut execution).unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.read_count, 7);
    assert_eq!(execution.write_count, 7);
    assert_eq!(execution.commit_count, 3);
    assert_eq!(execution.rollback_count, 0);
}

#[test]
fn empty_final_chunk_commits_without_writing() {
    let reader = ListReader::of(people(6));
    let mut writer = MockWriter::new();
    writer.expect_open().returning(|| Ok(()));
    writer.expect_begin().times(3).returning(|| Ok(()));
    writer.expect_write().times(2).returning(|_| Ok(()));
    writer.expect_commit().times(3).returning(|| Ok(()));
    writer.expect_close().returning(|| Ok(()));

    let step = StepBuilder::new("step1")
        .chunk(3)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&writer)
        .build()
        .unwrap();
    let mut execution = StepExecution::new(step.get_name());

    step.execute(&mut execution).unwrap();

    assert_eq!(execution.write_count, 6);
    assert_eq!(execution.commit_count, 3);
}

#[test]
fn failed_commit_fails_step_and_keeps_previous_chunks() {
    common::init_logger();
    let reader = ListReader::of(people(9));
    let mut writer = MockWriter::new();
    let mut commits = 0;
    writer.expect_open().returning(|| Ok(()));
    writer.expect_begin().times(2).returning(|| Ok(()));
    writer.expect_write().times(2).returning(|_| Ok(()));
    writer.expect_commit().times(2).returning(move || {
        commits += 1;
        if commits == 2 {
            Err(BatchError::Persistence("disk I/O error".to_string()))
        } else {
            Ok(())
        }
    });
    writer.expect_rollback().times(1).returning(|| Ok(()));
    writer.expect_close().times(1).returning(|| Ok(()));

    let step = StepBuilder::new("step1")
        .chunk(3)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&writer)
        .build()
        .unwrap();
    let mut execution = StepExecution::new(step.get_name());

    let result = step.execute(&mut execution);

    assert!(matches!(result, Err(BatchError::Step(_))));
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.read_count, 3);
    assert_eq!(execution.write_count, 3);
    assert_eq!(execution.commit_count, 1);
    assert_eq!(execution.rollback_count, 1);
    assert!(
        execution
            .exit_message
            .as_deref()
            .is_some_and(|m| m.contains("disk I/O error"))
    );
}

#[test]
fn rejected_item_is_skipped_after_scanning_the_chunk() {
    common::init_logger();
    let reader = ListReader::of(vec![
        Person::new("a", "x"),
        Person::new("BAD", "x"),
        Person::new("c", "x"),
    ]);
    let mut writer = MockWriter::new();
    writer.expect_open().returning(|| Ok(()));
    // chunk, item by item rewrite, empty final chunk
    writer.expect_begin().times(3).returning(|| Ok(()));
    writer.expect_write().times(4).returning(|items| {
        if items.iter().any(|p| p.first_name == "BAD") {
            Err(BatchError::Persistence("CHECK constraint failed".to_string()))
        } else {
            Ok(())
        }
    });
    writer.expect_rollback().times(1).returning(|| Ok(()));
    writer.expect_commit().times(2).returning(|| Ok(()));
    writer.expect_close().returning(|| Ok(()));

    let step = StepBuilder::new("step1")
        .chunk(3)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&writer)
        .skip_policy(SkipPolicy::new().skip_limit(1).skip_write_failures(true))
        .build()
        .unwrap();
    let mut execution = StepExecution::new(step.get_name());

    step.execute(&mut execution).unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.read_count, 3);
    assert_eq!(execution.write_count, 2);
    assert_eq!(execution.write_skip_count, 1);
    assert_eq!(execution.rollback_count, 1);
    assert_eq!(execution.commit_count, 2);
}

#[test]
fn malformed_row_is_skipped_within_limit() {
    let reader = ListReader::new(vec![
        Ok(Person::new("Jane", "Doe")),
        Ok(Person::new("John", "Smith")),
        Err(malformed(3)),
    ]);
    let writer = CollectingWriter::default();

    let step = StepBuilder::new("step1")
        .chunk(2)
        .reader(&reader)
        .processor(&UpperCaseProcessor)
        .writer(&writer)
        .skip_limit(1)
        .build()
        .unwrap();
    let mut execution = StepExecution::new(step.get_name());

    step.execute(&mut execution).unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.write_count, 2);
    assert_eq!(execution.skip_count(), 1);
    assert_eq!(
        writer.committed(),
        vec![Person::new("JANE", "Doe"), Person::new("JOHN", "Smith")]
    );
}

#[test]
fn filtering_everything_writes_nothing() {
    struct RejectAll;
    impl ItemProcessor<Person, Person> for RejectAll {
        fn process(&self, _item: &Person) -> ItemProcessorResult<Person> {
            Ok(None)
        }
    }

    let reader = ListReader::of(people(12));
    let writer = CollectingWriter::default();
    let step = StepBuilder::new("step1")
        .chunk(5)
        .reader(&reader)
        .processor(&RejectAll)
        .writer(&writer)
        .build()
        .unwrap();
    let mut execution = StepExecution::new(step.get_name());

    step.execute(&mut execution).unwrap();

    assert_eq!(execution.write_count, 0);
    assert_eq!(execution.filter_count, 12);
    assert_eq!(execution.filter_count + execution.skip_count(), 12);
    assert!(writer.committed().is_empty());
}

/// Input entry of the generated record sequences.
#[derive(Debug, Clone)]
enum Entry {
    Good(u32),
    Malformed,
    Invalid,
    Filtered,
}

struct EntryProcessor;

impl ItemProcessor<Entry, u32> for EntryProcessor {
    fn process(&self, item: &Entry) -> ItemProcessorResult<u32> {
        match item {
            Entry::Good(value) => Ok(Some(*value)),
            Entry::Invalid => Err(BatchError::Validation("invalid".to_string())),
            _ => Ok(None),
        }
    }
}

fn entry_strategy() -> impl Strategy<Value = Entry> {
    prop_oneof![
        4 => any::<u32>().prop_map(Entry::Good),
        1 => Just(Entry::Malformed),
        1 => Just(Entry::Invalid),
        1 => Just(Entry::Filtered),
    ]
}

fn to_reader(entries: &[Entry]) -> ListReader<Entry> {
    ListReader::new(
        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| match entry {
                Entry::Malformed => Err(malformed(i as u64 + 1)),
                other => Ok(other.clone()),
            })
            .collect(),
    )
}

proptest! {
    #[test]
    fn no_record_is_silently_lost(
        entries in prop::collection::vec(entry_strategy(), 0..80),
        chunk_size in 1usize..12,
    ) {
        let reader = to_reader(&entries);
        let writer = CollectingWriter::default();
        let step = StepBuilder::new("step1")
            .chunk(chunk_size)
            .reader(&reader)
            .processor(&EntryProcessor)
            .writer(&writer)
            .skip_limit(entries.len())
            .build()
            .unwrap();
        let mut execution = StepExecution::new(step.get_name());

        step.execute(&mut execution).unwrap();

        let good: Vec<u32> = entries
            .iter()
            .filter_map(|e| match e {
                Entry::Good(value) => Some(*value),
                _ => None,
            })
            .collect();
        prop_assert_eq!(execution.read_count, entries.len());
        prop_assert_eq!(
            execution.read_count,
            execution.write_count + execution.filter_count + execution.skip_count()
        );
        prop_assert_eq!(writer.committed(), good);
        prop_assert_eq!(execution.commit_count, entries.len() / chunk_size + 1);
    }

    #[test]
    fn aborted_chunk_leaves_only_prior_chunks_committed(
        len in 1usize..60,
        chunk_size in 1usize..12,
        failure in any::<prop::sample::Index>(),
    ) {
        let failure = failure.index(len);
        let mut entries: Vec<Entry> = (0..len as u32).map(Entry::Good).collect();
        entries[failure] = Entry::Malformed;
        let reader = to_reader(&entries);
        let writer = CollectingWriter::default();
        let step = StepBuilder::new("step1")
            .chunk(chunk_size)
            .reader(&reader)
            .processor(&EntryProcessor)
            .writer(&writer)
            .build()
            .unwrap();
        let mut execution = StepExecution::new(step.get_name());

        prop_assert!(step.execute(&mut execution).is_err());

        let committed = failure / chunk_size * chunk_size;
        let expected: Vec<u32> = (0..committed as u32).collect();
        prop_assert_eq!(execution.status, BatchStatus::Failed);
        prop_assert_eq!(writer.committed(), expected);
        prop_assert_eq!(execution.write_count, committed);
        prop_assert_eq!(execution.committed_position(), committed);
    }
}
