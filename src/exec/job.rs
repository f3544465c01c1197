//! Background job table (§4.10): `attach`/`findEntry`/`updateStatus`/
//! `waitAndDetach` as a flat `Vec`, mirroring the small job counts real
//! interactive shells deal with.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done(i32),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: u32,
    pub pgid: libc::pid_t,
    pub pids: Vec<libc::pid_t>,
    pub status: JobState,
}

pub struct JobTable {
    jobs: Vec<Job>,
    next_id: u32,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable { jobs: Vec::new(), next_id: 1 }
    }

    pub fn register(&mut self, pgid: libc::pid_t, pids: Vec<libc::pid_t>) -> Job {
        let job = Job { job_id: self.next_id, pgid, pids, status: JobState::Running };
        self.next_id += 1;
        self.jobs.push(job.clone());
        job
    }

    pub fn find(&self, job_id: u32) -> Option<&Job> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }

    pub fn find_by_pgid(&mut self, pgid: libc::pid_t) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.pgid == pgid)
    }

    pub fn all(&self) -> &[Job] {
        &self.jobs
    }

    pub fn update_status(&mut self, job_id: u32, status: JobState) {
        if let Some(j) = self.jobs.iter_mut().find(|j| j.job_id == job_id) {
            j.status = status;
        }
    }

    /// Non-blocking reap of all tracked background pids, updating job
    /// states in place.
    pub fn reap(&mut self) {
        for job in &mut self.jobs {
            if job.status == JobState::Done(job_done_code(job)) {
                continue;
            }
            let mut all_done = true;
            let mut last_code = 0;
            for &pid in &job.pids {
                let mut wstatus = 0;
                let r = unsafe { libc::waitpid(pid, &mut wstatus, libc::WNOHANG | libc::WUNTRACED) };
                if r == 0 {
                    all_done = false;
                } else if r > 0 {
                    if libc::WIFEXITED(wstatus) {
                        last_code = libc::WEXITSTATUS(wstatus);
                    } else if libc::WIFSIGNALED(wstatus) {
                        last_code = 128 + libc::WTERMSIG(wstatus);
                    } else if libc::WIFSTOPPED(wstatus) {
                        job.status = JobState::Stopped;
                        all_done = false;
                    }
                }
            }
            if all_done && job.status != JobState::Stopped {
                job.status = JobState::Done(last_code);
            }
        }
    }

    /// Blocks until `job_id` finishes, then removes it from the table.
    pub fn wait_and_detach(&mut self, job_id: u32) -> Option<i32> {
        let job = self.jobs.iter().find(|j| j.job_id == job_id)?.clone();
        let mut last_code = 0;
        for &pid in &job.pids {
            let mut wstatus = 0;
            unsafe { libc::waitpid(pid, &mut wstatus, 0) };
            if libc::WIFEXITED(wstatus) {
                last_code = libc::WEXITSTATUS(wstatus);
            } else if libc::WIFSIGNALED(wstatus) {
                last_code = 128 + libc::WTERMSIG(wstatus);
            }
        }
        self.jobs.retain(|j| j.job_id != job_id);
        Some(last_code)
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

fn job_done_code(job: &Job) -> i32 {
    match job.status {
        JobState::Done(c) => c,
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_increasing_ids() {
        let mut jobs = JobTable::new();
        let a = jobs.register(100, vec![100]);
        let b = jobs.register(200, vec![200]);
        assert_eq!(a.job_id, 1);
        assert_eq!(b.job_id, 2);
    }
}
