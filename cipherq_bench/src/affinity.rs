//! Worker thread pinning. Cores are assigned downward from the last online
//! core by thread index.

fn num_online_cores() -> usize {
    unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) as usize }
}

fn pin_to_core(core_id: usize) -> Result<(), i32> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret == 0 {
            Ok(())
        } else {
            Err(*libc::__errno_location())
        }
    }
}

/// Pin the current thread if pinning is enabled. Does nothing otherwise.
pub fn pin_thread_if_configured(pin: bool, thread_index: usize) {
    if !pin {
        return;
    }

    let start_core = num_online_cores() - 1;
    if thread_index > start_core {
        eprintln!(
            "thread {}: no core left to pin (start core {})",
            thread_index, start_core
        );
        return;
    }
    let core_id = start_core - thread_index;

    match pin_to_core(core_id) {
        Ok(()) => {
            eprintln!("thread {} pinned to core {}", thread_index, core_id);
        }
        Err(errno) => {
            eprintln!(
                "thread {}: failed to pin to core {} (errno={})",
                thread_index, core_id, errno
            );
        }
    }
}
