use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strata_scheduler::{
    BatchDebouncer, BatchError, CancellationToken, PoolKind, Scheduler, SchedulerConfig,
};

const DELAY: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(5);

fn scheduler() -> Scheduler {
    Scheduler::new(SchedulerConfig {
        compute_threads: 1,
        background_threads: 2,
        io_threads: 1,
    })
}

fn recording_debouncer(
    scheduler: Scheduler,
) -> (
    BatchDebouncer<&'static str, u32>,
    crossbeam_channel::Receiver<Vec<(&'static str, u32)>>,
) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let debouncer = BatchDebouncer::new(
        "recording",
        scheduler,
        PoolKind::Background,
        DELAY,
        move |batch: Vec<(&'static str, u32)>, _token: &CancellationToken| -> Result<(), BatchError> {
            tx.send(batch).map_err(|err| BatchError::Failed(err.to_string()))
        },
    );
    (debouncer, rx)
}

#[test]
fn burst_for_one_key_yields_single_item_with_latest_value() {
    let (debouncer, batches) = recording_debouncer(scheduler());

    debouncer.enqueue("a", 1);
    debouncer.enqueue("a", 2);
    debouncer.enqueue("a", 3);

    let batch = batches.recv_timeout(WAIT).expect("batch should be processed");
    assert_eq!(batch, vec![("a", 3)]);

    assert!(
        batches.recv_timeout(DELAY * 4).is_err(),
        "coalesced work must not produce a second batch"
    );
}

#[test]
fn batch_preserves_first_enqueue_order() {
    let (debouncer, batches) = recording_debouncer(scheduler());

    debouncer.enqueue("b", 1);
    debouncer.enqueue("a", 1);
    debouncer.enqueue("b", 2);

    let batch = batches.recv_timeout(WAIT).expect("batch should be processed");
    assert_eq!(batch, vec![("b", 2), ("a", 1)]);
}

#[test]
fn work_enqueued_while_processing_lands_in_next_batch() {
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let (batch_tx, batch_rx) = crossbeam_channel::unbounded();
    let calls = Arc::new(AtomicUsize::new(0));

    let calls_for_processor = Arc::clone(&calls);
    let debouncer = BatchDebouncer::new(
        "blocking",
        scheduler(),
        PoolKind::Background,
        DELAY,
        move |batch: Vec<(&'static str, u32)>, _token: &CancellationToken| -> Result<(), BatchError> {
            if calls_for_processor.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(WAIT);
            }
            let _ = batch_tx.send(batch);
            Ok(())
        },
    );

    debouncer.enqueue("first", 1);
    started_rx.recv_timeout(WAIT).expect("first batch should start");

    debouncer.enqueue("second", 2);
    assert_eq!(debouncer.pending_len(), 1);
    release_tx.send(()).expect("processor is waiting");

    assert_eq!(batch_rx.recv_timeout(WAIT).unwrap(), vec![("first", 1)]);
    assert_eq!(batch_rx.recv_timeout(WAIT).unwrap(), vec![("second", 2)]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn failing_or_panicking_processor_does_not_stop_the_debouncer() {
    let (batch_tx, batch_rx) = crossbeam_channel::unbounded();
    let calls = Arc::new(AtomicUsize::new(0));

    let calls_for_processor = Arc::clone(&calls);
    let debouncer = BatchDebouncer::new(
        "flaky",
        scheduler(),
        PoolKind::Background,
        DELAY,
        move |batch: Vec<(&'static str, u32)>, _token: &CancellationToken| -> Result<(), BatchError> {
            let call = calls_for_processor.fetch_add(1, Ordering::SeqCst);
            let _ = batch_tx.send(batch);
            match call {
                0 => Err(BatchError::Failed("resolver unavailable".to_string())),
                1 => panic!("processor crashed"),
                _ => Ok(()),
            }
        },
    );

    for (round, key) in ["one", "two", "three"].into_iter().enumerate() {
        debouncer.enqueue(key, round as u32);
        let batch = batch_rx.recv_timeout(WAIT).expect("batch should be processed");
        assert_eq!(batch, vec![(key, round as u32)]);

        let deadline = std::time::Instant::now() + WAIT;
        while !debouncer.is_idle() {
            assert!(std::time::Instant::now() < deadline, "debouncer never went idle");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn runs_on_an_existing_runtime() {
    let scheduler = Scheduler::new_with_io_handle(
        SchedulerConfig {
            compute_threads: 1,
            background_threads: 1,
            io_threads: 1,
        },
        tokio::runtime::Handle::current(),
    );
    let (debouncer, batches) = recording_debouncer(scheduler);
    debouncer.enqueue("x", 7);

    let batch = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(batch) = batches.try_recv() {
                return batch;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("batch should be processed");
    assert_eq!(batch, vec![("x", 7)]);
}

#[test]
fn enqueue_racing_shutdown_leaves_nothing_pending() {
    const KEYS: [&str; 4] = ["a", "b", "c", "d"];

    for _ in 0..50 {
        let (debouncer, _batches) = recording_debouncer(scheduler());
        let producers: Vec<_> = KEYS
            .into_iter()
            .map(|key| {
                let debouncer = debouncer.clone();
                std::thread::spawn(move || {
                    for value in 0..100 {
                        debouncer.enqueue(key, value);
                    }
                })
            })
            .collect();

        debouncer.shutdown();
        for producer in producers {
            producer.join().expect("producer thread");
        }

        assert_eq!(debouncer.pending_len(), 0);
    }
}
