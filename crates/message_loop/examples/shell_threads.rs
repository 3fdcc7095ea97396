// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs the two engine threads of a shell, merges them for a while so that raster work runs on
//! the UI thread, then splits them again.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use message_loop::{CountDownLatch, MessageLoopTaskQueues, Thread, TimeDelta};

fn main() -> Result<(), message_loop::Error> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let task_queues = MessageLoopTaskQueues::new();
    let ui = Thread::new("ui", &task_queues)?;
    let raster = Thread::new("raster", &task_queues)?;

    let ui_queue = ui.task_runner().queue_id();
    let raster_queue = raster.task_runner().queue_id();

    ui.message_loop().add_task_observer(1, || println!("ui finished a batch of tasks"));

    post_frames(&raster, "separate", 3);

    println!("merged: {}", task_queues.merge(ui_queue, raster_queue));
    post_frames(&raster, "merged", 3);

    println!("unmerged: {}", task_queues.unmerge(ui_queue, raster_queue));
    post_frames(&raster, "separate again", 3);

    // Give the observer a chance to report before the threads shut down.
    thread::sleep(Duration::from_millis(10));

    raster.join();
    ui.join();

    Ok(())
}

fn post_frames(raster: &Thread, phase: &'static str, count: usize) {
    let latch = Arc::new(CountDownLatch::new(count));

    for frame in 0..count {
        let latch = Arc::clone(&latch);
        let delay = TimeDelta::from_milliseconds(i64::try_from(frame).unwrap_or_default() * 2);

        raster.task_runner().post_delayed_task(
            move || {
                let thread = thread::current();
                println!("[{phase}] frame {frame} rasterized on {}", thread.name().unwrap_or("?"));
                latch.count_down();
            },
            delay,
        );
    }

    latch.wait();
}
