//! Producer-consumer demo over a message queue
//!
//! Two tasks share a bounded queue: the producer pushes a counter
//! value five times a second, the consumer drains it as fast as the
//! scheduler lets it. Runs on ARM targets; on the host this builds
//! to an empty stub so the example compiles everywhere.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
mod demo {
    use kestrel::types::{SchedPolicy, TaskPriority, WAIT_FOREVER};
    use kestrel::{kernel, task, MessageQueue, TaskParams};

    static QUEUE: MessageQueue<u32, 8> = MessageQueue::new();

    fn producer(_: *mut ()) -> ! {
        let mut n = 0u32;
        loop {
            n = n.wrapping_add(1);
            let _ = QUEUE.send(n, WAIT_FOREVER);
            kestrel::klog!(info, "produced {=u32}", n);
            let _ = task::delay(200);
        }
    }

    fn consumer(_: *mut ()) -> ! {
        loop {
            if let Ok(v) = QUEUE.receive(WAIT_FOREVER) {
                kestrel::klog!(info, "consumed {=u32}", v);
            }
        }
    }

    #[cortex_m_rt::entry]
    fn main() -> ! {
        kernel::init(SchedPolicy::RoundRobin).expect("kernel init failed");
        QUEUE.create("pipeline").expect("queue create failed");

        let mut p = TaskParams::new("producer", producer);
        p.priority = TaskPriority::Normal;
        task::create(&p).expect("producer create failed");

        let mut c = TaskParams::new("consumer", consumer);
        c.priority = TaskPriority::Normal;
        task::create(&c).expect("consumer create failed");

        kernel::start().expect("kernel start failed");

        loop {
            cortex_m::asm::wfi();
        }
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
