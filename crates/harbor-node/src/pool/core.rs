use std::sync::Arc;

use harbor_actor::actor::ActorContext;
use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::actor::{NodeActor, NodeEvent};
use crate::error::{NodeError, NodeResult, PopWorkerError};
use crate::id::{ConnectionId, JobId, RequestId, StartupToken, WorkerId};
use crate::job::{JobConfig, JobState};
use crate::launcher::{build_worker_command, ProcessEnvironment, WorkerCommandContext};
use crate::pool::state::{
    PendingEnvCreation, PendingPopWorkerRequest, StartingWorkerProcess, WorkerSpawnSpec,
};
use crate::pool::WorkerPool;
use crate::request::{
    IoWorkerCallback, PopWorkerRequest, PrestartRequest, RegistrationCallback, WorkerLease,
};
use crate::runtime_env::is_runtime_env_empty;
use crate::worker::{
    DriverRecord, DriverRegistration, ExitReply, ExitRequest, Language, WorkerExitType,
    WorkerLifecycle, WorkerRecord, WorkerRegistration, WorkerType,
};

impl WorkerPool {
    /// Requests a worker lease for one task. The continuation is invoked
    /// exactly once, either synchronously with a matching idle worker, or
    /// later once a launched worker announces itself, or with a failure.
    pub fn pop_worker(&mut self, ctx: &mut ActorContext<NodeActor>, request: PopWorkerRequest) {
        match self.jobs.state(request.job_id) {
            None => {
                warn!(
                    "rejecting pop worker request: no job config for job {}",
                    request.job_id
                );
                (request.callback)(Err(PopWorkerError::JobConfigMissing));
                return;
            }
            Some(JobState::Finished) => {
                (request.callback)(Err(PopWorkerError::JobFinished));
                return;
            }
            Some(JobState::Running) => {}
        }
        if let Some(worker_id) = self.find_matching_idle_worker(&request) {
            let Some(lease) = self.lease_worker(worker_id, &request) else {
                return;
            };
            let used = (request.callback)(Ok(lease));
            if !used {
                self.push_worker(ctx, worker_id);
            }
            return;
        }
        let request_id = match self.request_id_generator.next() {
            Ok(id) => id,
            Err(e) => {
                error!("failed to generate pop worker request IDs: {e}");
                return;
            }
        };
        self.start_new_worker(ctx, PendingPopWorkerRequest { request_id, request });
    }

    /// Returns a leased worker to the pool. The worker first tries to
    /// satisfy a queued request it matches; otherwise it becomes idle.
    pub fn push_worker(&mut self, ctx: &mut ActorContext<NodeActor>, worker_id: WorkerId) {
        let Some(worker) = self.workers.get(&worker_id) else {
            warn!("cannot push unknown worker {worker_id}");
            return;
        };
        if worker.worker_type.is_io_worker() {
            self.push_io_worker(ctx, worker_id);
            return;
        }
        match worker.state {
            WorkerLifecycle::PendingExit | WorkerLifecycle::Dead => {
                warn!("cannot push exiting worker {worker_id}");
                return;
            }
            WorkerLifecycle::Idle => {
                warn!("worker {worker_id} is already idle");
                return;
            }
            WorkerLifecycle::PendingAnnounce | WorkerLifecycle::Leased => {}
        }
        loop {
            let Some(pending) = self.take_matching_pending_registration(worker_id) else {
                break;
            };
            let Some(lease) = self.lease_worker(worker_id, &pending.request) else {
                return;
            };
            let used = (pending.request.callback)(Ok(lease));
            if used {
                return;
            }
        }
        self.make_worker_idle(worker_id);
    }

    /// Accepts the register call of a newly started worker and binds it to
    /// the launch identified by the startup token. The worker cannot serve
    /// requests until it announces its port.
    pub fn register_worker(&mut self, registration: WorkerRegistration) -> NodeResult<()> {
        let WorkerRegistration {
            worker_id,
            connection,
            pid,
            startup_token,
            language,
            worker_type,
            runtime_env_hash,
            client,
        } = registration;
        if self.workers.contains_key(&worker_id) {
            panic!("worker {worker_id} is registered twice");
        }
        let Some(state) = self.states_by_language.get(&language) else {
            return Err(NodeError::invalid(format!("unknown language {language}")));
        };
        let Some(process) = state.starting.get(&startup_token) else {
            return Err(NodeError::invalid(format!(
                "no starting {language} worker process with startup token {startup_token}"
            )));
        };
        if process.handle.pid() != pid {
            return Err(NodeError::invalid(format!(
                "worker pid {pid} does not match the process launched with startup token \
                 {startup_token}"
            )));
        }
        if process.worker_type != worker_type {
            return Err(NodeError::invalid(format!(
                "worker type {worker_type:?} does not match the launched worker type {:?}",
                process.worker_type
            )));
        }
        if process.runtime_env_hash != runtime_env_hash {
            return Err(NodeError::invalid(format!(
                "runtime environment hash {runtime_env_hash} does not match the launched hash {}",
                process.runtime_env_hash
            )));
        }
        let record = WorkerRecord {
            worker_id,
            language,
            worker_type,
            job_id: process.job_id,
            root_detached_actor_id: None,
            runtime_env_hash,
            serialized_runtime_env: process.serialized_runtime_env.clone(),
            dynamic_options: process.dynamic_options.clone(),
            gpu: process.gpu,
            actor_worker: process.actor_worker,
            startup_token,
            process: process.handle,
            connection,
            client,
            state: WorkerLifecycle::PendingAnnounce,
            port: None,
            last_idle_time: None,
            keep_alive_deadline: process.keep_alive_deadline,
        };
        self.registered_by_connection.insert(connection, worker_id);
        self.workers.insert(worker_id, record);
        info!("registered {language} worker {worker_id} (pid {pid})");
        Ok(())
    }

    /// Handles the port announcement of a registered worker. The worker
    /// becomes available: it either satisfies a queued request right away
    /// or joins the idle pool. The freed startup slot is then offered to
    /// queued start requests.
    pub fn on_worker_started(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        worker_id: WorkerId,
        port: u16,
    ) {
        let (language, startup_token, worker_type) = {
            let Some(worker) = self.workers.get_mut(&worker_id) else {
                warn!("cannot announce unregistered worker {worker_id}");
                return;
            };
            worker.port = Some(port);
            (worker.language, worker.startup_token, worker.worker_type)
        };
        let Some(state) = self.states_by_language.get_mut(&language) else {
            return;
        };
        if state.starting.remove(&startup_token).is_none() {
            warn!("no starting worker process with startup token {startup_token}");
        }
        if worker_type.is_io_worker() {
            let io = state.io_state_mut(worker_type);
            io.num_starting = io.num_starting.saturating_sub(1);
            io.started.insert(worker_id);
        }
        if !state.first_worker_announced {
            state.first_worker_announced = true;
            for callback in state.deferred_driver_callbacks.drain(..) {
                callback(Ok(()));
            }
        }
        debug!("worker {worker_id} announced port {port}");
        if worker_type.is_io_worker() {
            self.push_io_worker(ctx, worker_id);
        } else {
            self.push_worker(ctx, worker_id);
        }
        self.try_pending_start_requests(ctx, language);
    }

    /// Handles a transport-level disconnect. The worker is dead from this
    /// point on: all local state is dropped and its runtime environment
    /// reference is released, whatever phase the worker was in.
    pub fn disconnect_worker(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        worker_id: WorkerId,
        exit_type: WorkerExitType,
    ) {
        if let Some(driver) = self.drivers.remove(&worker_id) {
            info!(
                "driver {worker_id} of job {} disconnected ({exit_type:?})",
                driver.job_id
            );
            return;
        }
        if self.remove_worker_record(ctx, worker_id).is_some() {
            info!("worker {worker_id} disconnected ({exit_type:?})");
        } else {
            warn!("cannot disconnect unknown worker {worker_id}");
        }
    }

    /// Registers a driver process. The driver's job config is installed so
    /// that pop requests for the job pass the job gate. The first driver
    /// of a warm-start language is acknowledged only once the first worker
    /// of that language has announced its port.
    pub fn register_driver(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        registration: DriverRegistration,
        job_config: JobConfig,
        callback: RegistrationCallback,
    ) {
        let DriverRegistration {
            worker_id,
            pid,
            language,
            job_id,
        } = registration;
        self.drivers.insert(
            worker_id,
            DriverRecord {
                worker_id,
                language,
                job_id,
            },
        );
        info!("registered {language} driver {worker_id} (pid {pid}) for job {job_id}");
        self.handle_job_started(ctx, job_id, job_config);
        let Some(state) = self.states_by_language.get_mut(&language) else {
            callback(Ok(()));
            return;
        };
        let first_driver = !state.first_driver_registered;
        state.first_driver_registered = true;
        if first_driver && language.defers_first_driver_ack() && !state.first_worker_announced {
            state.deferred_driver_callbacks.push(callback);
        } else {
            callback(Ok(()));
        }
    }

    /// Records a started job and applies its eager runtime environment
    /// install, if any. Idempotent: later announcements of a known job are
    /// ignored.
    pub fn handle_job_started(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        job_id: JobId,
        config: JobConfig,
    ) {
        let runtime_env = config.runtime_env.clone();
        if !self.jobs.insert(job_id, config) {
            return;
        }
        info!("job {job_id} started");
        if runtime_env.config.eager_install && !runtime_env.is_empty() {
            let handle = ctx.handle().clone();
            self.runtime_env_client.get_or_create_runtime_env(
                job_id,
                &runtime_env.serialized_runtime_env,
                &runtime_env.config,
                Box::new(move |result| {
                    let _ = handle.send(NodeEvent::JobRuntimeEnvPrepared { job_id, result });
                }),
            );
        }
    }

    /// Marks a job as finished. Requests queued for the job fail
    /// immediately, the job-level runtime environment reference is
    /// released, and the job's idle workers are reclaimed forcibly.
    pub fn handle_job_finished(&mut self, ctx: &mut ActorContext<NodeActor>, job_id: JobId) {
        let eager_env = {
            let Some(record) = self.jobs.finish(job_id) else {
                warn!("cannot finish unknown or already finished job {job_id}");
                return;
            };
            if record.holds_eager_env_ref {
                record.holds_eager_env_ref = false;
                Some(record.config.runtime_env.serialized_runtime_env.clone())
            } else {
                None
            }
        };
        info!("job {job_id} finished");
        let mut failed = vec![];
        for state in self.states_by_language.values_mut() {
            for queue in [
                &mut state.pending_start_requests,
                &mut state.pending_registration_requests,
            ] {
                let drained = std::mem::take(queue);
                for pending in drained {
                    if pending.request.job_id == job_id {
                        failed.push(pending.request.callback);
                    } else {
                        queue.push_back(pending);
                    }
                }
            }
        }
        for callback in failed {
            callback(Err(PopWorkerError::JobFinished));
        }
        if let Some(serialized) = eager_env {
            self.release_runtime_env_reference(&serialized);
        }
        self.try_killing_idle_workers(ctx);
    }

    /// Ensures that enough workers are starting for an anticipated batch
    /// of tasks, up to the idle soft limit and within the startup budget.
    pub fn prestart_workers(&mut self, ctx: &mut ActorContext<NodeActor>, request: PrestartRequest) {
        if !self.options.enable_worker_prestart {
            return;
        }
        let runtime_env_hash = request.runtime_env.hash();
        let target = request.num_needed.min(self.num_available_cpus);
        let in_flight = {
            let Some(state) = self.states_by_language.get(&request.language) else {
                return;
            };
            let starting = state
                .starting
                .values()
                .filter(|p| {
                    p.worker_type == WorkerType::Worker && p.runtime_env_hash == runtime_env_hash
                })
                .count();
            let resolving = self
                .pending_env_creations
                .values()
                .filter(|p| match p {
                    PendingEnvCreation::ForSpawn(spec) => {
                        spec.language == request.language
                            && spec.runtime_env_hash == runtime_env_hash
                    }
                    PendingEnvCreation::ForRequest(_) => false,
                })
                .count();
            starting + resolving
        };
        if in_flight >= target {
            return;
        }
        debug!(
            "prestarting {} {} workers",
            target - in_flight,
            request.language
        );
        for _ in in_flight..target {
            let slots_in_use = self
                .states_by_language
                .get(&request.language)
                .map(|s| s.num_startup_slots_in_use())
                .unwrap_or(0);
            if slots_in_use >= self.options.maximum_startup_concurrency {
                break;
            }
            let spec = WorkerSpawnSpec {
                language: request.language,
                worker_type: WorkerType::Worker,
                job_id: Some(request.job_id),
                runtime_env: request.runtime_env.clone(),
                runtime_env_hash,
                dynamic_options: vec![],
                gpu: None,
                actor_worker: None,
                keep_alive: None,
            };
            self.spawn_worker(ctx, spec);
        }
    }

    /// Requests a spill or restore worker. The continuation is invoked
    /// synchronously when an idle worker exists; otherwise it is queued
    /// and a new worker is started if the sub-pool cap allows.
    pub fn pop_io_worker(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        worker_type: WorkerType,
        callback: IoWorkerCallback,
    ) {
        // I/O workers run in the Python runtime.
        let language = Language::Python;
        let idle_worker = {
            let Some(state) = self.states_by_language.get_mut(&language) else {
                return;
            };
            state.io_state_mut(worker_type).idle.pop()
        };
        if let Some(worker_id) = idle_worker {
            if let Some(lease) = self.lease_io_worker(worker_id) {
                callback(lease);
            }
            return;
        }
        let should_start = {
            let Some(state) = self.states_by_language.get_mut(&language) else {
                return;
            };
            let io = state.io_state_mut(worker_type);
            io.pending_requests.push_back(callback);
            io.num_starting + io.started.len() < self.options.max_io_workers
        };
        if should_start {
            self.spawn_worker(ctx, WorkerSpawnSpec::for_io_worker(language, worker_type));
        }
    }

    /// Picks a delete worker from whichever of the spill and restore
    /// sub-pools currently has more idle workers, so that deletes starve
    /// neither pipeline.
    pub fn pop_delete_worker(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        callback: IoWorkerCallback,
    ) {
        let worker_type = {
            let Some(state) = self.states_by_language.get(&Language::Python) else {
                return;
            };
            if state.spill_io.idle.len() >= state.restore_io.idle.len() {
                WorkerType::SpillWorker
            } else {
                WorkerType::RestoreWorker
            }
        };
        self.pop_io_worker(ctx, worker_type, callback);
    }

    /// Returns an I/O worker to its sub-pool, serving a queued request
    /// first if one exists.
    pub fn push_io_worker(&mut self, _ctx: &mut ActorContext<NodeActor>, worker_id: WorkerId) {
        let Some(worker) = self.workers.get(&worker_id) else {
            warn!("cannot push unknown I/O worker {worker_id}");
            return;
        };
        if !worker.worker_type.is_io_worker() {
            warn!("worker {worker_id} is not an I/O worker");
            return;
        }
        let language = worker.language;
        let worker_type = worker.worker_type;
        let callback = {
            let Some(state) = self.states_by_language.get_mut(&language) else {
                return;
            };
            let io = state.io_state_mut(worker_type);
            if !io.started.contains(&worker_id) {
                warn!("I/O worker {worker_id} has not announced its port");
                return;
            }
            if io.idle.contains(&worker_id) {
                return;
            }
            io.pending_requests.pop_front()
        };
        match callback {
            Some(callback) => {
                if let Some(lease) = self.lease_io_worker(worker_id) {
                    callback(lease);
                }
            }
            None => {
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    worker.state = WorkerLifecycle::Idle;
                }
                if let Some(state) = self.states_by_language.get_mut(&language) {
                    state.io_state_mut(worker_type).idle.push(worker_id);
                }
            }
        }
    }

    /// Reclaims idle workers: workers of finished jobs are asked to exit
    /// forcibly, and the per-language idle pools are trimmed to the soft
    /// limit, oldest first, honouring grace periods and keep-alives. At
    /// most one `Exit` is in flight per worker.
    pub fn try_killing_idle_workers(&mut self, ctx: &mut ActorContext<NodeActor>) {
        let now = Instant::now();
        let languages: Vec<Language> = self.states_by_language.keys().copied().collect();
        for language in languages {
            let idle_snapshot: Vec<WorkerId> = match self.states_by_language.get(&language) {
                Some(state) => state.idle.iter().copied().collect(),
                None => continue,
            };
            for worker_id in &idle_snapshot {
                let finished = self
                    .workers
                    .get(worker_id)
                    .and_then(|w| w.job_id)
                    .is_some_and(|job_id| self.jobs.is_finished(job_id));
                if finished {
                    self.kill_idle_worker(ctx, *worker_id, true);
                }
            }
            for worker_id in &idle_snapshot {
                let idle_count = match self.states_by_language.get(&language) {
                    Some(state) => state.idle.len(),
                    None => break,
                };
                if idle_count <= self.num_available_cpus {
                    break;
                }
                if !self.is_soft_kill_eligible(*worker_id, now) {
                    continue;
                }
                self.kill_idle_worker(ctx, *worker_id, false);
            }
        }
    }

    /// Completion of a worker-level runtime environment creation.
    pub fn on_runtime_env_created(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        request_id: RequestId,
        result: Result<String, String>,
    ) {
        let Some(entry) = self.pending_env_creations.remove(&request_id) else {
            debug!("no pending runtime environment creation {request_id}");
            return;
        };
        let language = entry.language();
        if let Some(state) = self.states_by_language.get_mut(&language) {
            state.num_resolving = state.num_resolving.saturating_sub(1);
        }
        match entry {
            PendingEnvCreation::ForRequest(pending) => match result {
                Ok(_context) => {
                    if self.jobs.is_finished(pending.request.job_id) {
                        // The environment is no longer needed; undo the
                        // reference the creation took.
                        self.delete_runtime_env(
                            pending.request.runtime_env.serialized_runtime_env.clone(),
                        );
                        (pending.request.callback)(Err(PopWorkerError::JobFinished));
                        return;
                    }
                    self.runtime_env_refs
                        .add(&pending.request.runtime_env.serialized_runtime_env);
                    self.launch_for_request(ctx, pending);
                }
                Err(message) => {
                    warn!(
                        "failed to create runtime environment for job {}: {message}",
                        pending.request.job_id
                    );
                    (pending.request.callback)(Err(PopWorkerError::RuntimeEnvCreationFailed(
                        message,
                    )));
                }
            },
            PendingEnvCreation::ForSpawn(spec) => match result {
                Ok(_context) => {
                    self.runtime_env_refs
                        .add(&spec.runtime_env.serialized_runtime_env);
                    if self.launch_worker_process(&spec).is_err() {
                        self.release_runtime_env_reference(&spec.runtime_env.serialized_runtime_env);
                    }
                }
                Err(message) => {
                    warn!("failed to create runtime environment for prestart: {message}");
                }
            },
        }
    }

    /// Completion of an eager job-level runtime environment install.
    pub fn on_job_runtime_env_prepared(&mut self, job_id: JobId, result: Result<String, String>) {
        match result {
            Ok(_context) => {
                let serialized = {
                    let Some(record) = self.jobs.get_mut(job_id) else {
                        return;
                    };
                    if record.state == JobState::Finished {
                        // The job finished before the install completed;
                        // the reference must be dropped right away.
                        Some(record.config.runtime_env.serialized_runtime_env.clone())
                    } else {
                        record.holds_eager_env_ref = true;
                        self.runtime_env_refs
                            .add(&record.config.runtime_env.serialized_runtime_env);
                        None
                    }
                };
                if let Some(serialized) = serialized {
                    self.delete_runtime_env(serialized);
                }
            }
            Err(message) => {
                warn!("failed to eagerly install runtime environment for job {job_id}: {message}");
            }
        }
    }

    /// A pop worker request waited too long for a launched worker to
    /// register. The request fails, but the process stays in the starting
    /// table: if it ever announces it simply becomes an idle worker for a
    /// later request, and if it disconnects the slot is reclaimed then.
    pub fn on_registration_timeout(&mut self, request_id: RequestId) {
        for state in self.states_by_language.values_mut() {
            if let Some(position) = state
                .pending_registration_requests
                .iter()
                .position(|p| p.request_id == request_id)
            {
                let Some(pending) = state.pending_registration_requests.remove(position) else {
                    return;
                };
                warn!(
                    "pop worker request {request_id} for job {} timed out waiting for worker \
                     registration",
                    pending.request.job_id
                );
                (pending.request.callback)(Err(PopWorkerError::WorkerPendingRegistration));
                return;
            }
        }
    }

    /// A reply to an `Exit` request arrived. Success destroys the worker;
    /// refusal returns it to the tail of the idle pool so the next
    /// reclamation round tries the next candidate.
    pub fn on_worker_exit_replied(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        worker_id: WorkerId,
        reply: NodeResult<ExitReply>,
    ) {
        let Some(worker) = self.workers.get(&worker_id) else {
            debug!("exit reply for unknown worker {worker_id}");
            return;
        };
        if worker.state != WorkerLifecycle::PendingExit {
            warn!("unexpected exit reply for worker {worker_id}");
            return;
        }
        match reply {
            Ok(ExitReply { success: true }) => {
                info!("idle worker {worker_id} exited");
                self.remove_worker_record(ctx, worker_id);
            }
            Ok(ExitReply { success: false }) => {
                debug!("worker {worker_id} refused to exit");
                self.make_worker_idle(worker_id);
            }
            Err(e) => {
                warn!("failed to deliver the exit request to worker {worker_id}: {e}");
                self.make_worker_idle(worker_id);
            }
        }
    }

    pub fn update_available_cpus(&mut self, num_cpus: usize) {
        self.num_available_cpus = num_cpus;
    }

    pub fn get_registered_worker(&self, worker_id: WorkerId) -> Option<&WorkerRecord> {
        self.workers.get(&worker_id)
    }

    pub fn get_registered_worker_by_connection(
        &self,
        connection: ConnectionId,
    ) -> Option<&WorkerRecord> {
        self.registered_by_connection
            .get(&connection)
            .and_then(|worker_id| self.workers.get(worker_id))
    }

    pub(crate) fn get_registered_driver(&self, worker_id: WorkerId) -> Option<&DriverRecord> {
        self.drivers.get(&worker_id)
    }

    fn start_new_worker(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        pending: PendingPopWorkerRequest,
    ) {
        let language = pending.request.language;
        let Some(state) = self.states_by_language.get_mut(&language) else {
            return;
        };
        if state.num_startup_slots_in_use() >= self.options.maximum_startup_concurrency {
            debug!(
                "queueing pop worker request {} for job {}: {}",
                pending.request_id,
                pending.request.job_id,
                PopWorkerError::TooManyStartingWorkerProcesses
            );
            state.pending_start_requests.push_back(pending);
            return;
        }
        if pending.request.runtime_env.is_empty() {
            self.launch_for_request(ctx, pending);
            return;
        }
        state.num_resolving += 1;
        let request_id = pending.request_id;
        let job_id = pending.request.job_id;
        let serialized = pending.request.runtime_env.serialized_runtime_env.clone();
        let config = pending.request.runtime_env.config.clone();
        self.pending_env_creations
            .insert(request_id, PendingEnvCreation::ForRequest(pending));
        let handle = ctx.handle().clone();
        self.runtime_env_client.get_or_create_runtime_env(
            job_id,
            &serialized,
            &config,
            Box::new(move |result| {
                let _ = handle.send(NodeEvent::RuntimeEnvCreated { request_id, result });
            }),
        );
    }

    /// Spawns a worker that is not tied to a pop request (prestart and
    /// I/O sub-pool launches).
    fn spawn_worker(&mut self, ctx: &mut ActorContext<NodeActor>, spec: WorkerSpawnSpec) {
        if spec.runtime_env.is_empty() {
            if let Err(e) = self.launch_worker_process(&spec) {
                error!("failed to start a {} worker process: {e}", spec.language);
            }
            return;
        }
        let request_id = match self.request_id_generator.next() {
            Ok(id) => id,
            Err(e) => {
                error!("failed to generate pop worker request IDs: {e}");
                return;
            }
        };
        if let Some(state) = self.states_by_language.get_mut(&spec.language) {
            state.num_resolving += 1;
        }
        let job_id = spec.job_id.unwrap_or(JobId::from(0));
        let serialized = spec.runtime_env.serialized_runtime_env.clone();
        let config = spec.runtime_env.config.clone();
        self.pending_env_creations
            .insert(request_id, PendingEnvCreation::ForSpawn(spec));
        let handle = ctx.handle().clone();
        self.runtime_env_client.get_or_create_runtime_env(
            job_id,
            &serialized,
            &config,
            Box::new(move |result| {
                let _ = handle.send(NodeEvent::RuntimeEnvCreated { request_id, result });
            }),
        );
    }

    fn launch_for_request(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        pending: PendingPopWorkerRequest,
    ) {
        let spec = WorkerSpawnSpec::from_request(&pending.request);
        match self.launch_worker_process(&spec) {
            Ok(_handle) => {
                let request_id = pending.request_id;
                if let Some(state) = self.states_by_language.get_mut(&spec.language) {
                    state.pending_registration_requests.push_back(pending);
                }
                ctx.send_with_delay(
                    NodeEvent::RegistrationTimeout { request_id },
                    self.options.worker_register_timeout,
                );
            }
            Err(e) => {
                error!(
                    "failed to start a worker process for job {}: {e}",
                    pending.request.job_id
                );
                if !pending.request.runtime_env.is_empty() {
                    self.release_runtime_env_reference(
                        &pending.request.runtime_env.serialized_runtime_env,
                    );
                }
                (pending.request.callback)(Err(PopWorkerError::WorkerPendingRegistration));
            }
        }
    }

    fn launch_worker_process(&mut self, spec: &WorkerSpawnSpec) -> NodeResult<()> {
        let Some(template) = self.options.worker_commands.get(&spec.language) else {
            return Err(NodeError::invalid(format!(
                "no worker command is configured for {}",
                spec.language
            )));
        };
        let startup_token = StartupToken::from(self.next_startup_token);
        let job_config = spec.job_id.and_then(|job_id| self.jobs.config(job_id));
        let command = build_worker_command(
            template,
            &WorkerCommandContext {
                node_id: self.options.node_id,
                language: spec.language,
                worker_type: spec.worker_type,
                startup_token,
                runtime_env_hash: spec.runtime_env_hash,
                dynamic_options: &spec.dynamic_options,
                job_config,
                object_spilling_config: &self.options.object_spilling_config,
            },
        );
        let environment = ProcessEnvironment::new();
        let handle = self.launcher.launch(&command, &environment, startup_token)?;
        self.next_startup_token += 1;
        let keep_alive_deadline = spec.keep_alive.map(|duration| Instant::now() + duration);
        let Some(state) = self.states_by_language.get_mut(&spec.language) else {
            return Err(NodeError::internal(format!(
                "no pool state for {}",
                spec.language
            )));
        };
        state.starting.insert(
            startup_token,
            StartingWorkerProcess {
                handle,
                worker_type: spec.worker_type,
                job_id: spec.job_id,
                serialized_runtime_env: spec.runtime_env.serialized_runtime_env.clone(),
                runtime_env_hash: spec.runtime_env_hash,
                dynamic_options: spec.dynamic_options.clone(),
                gpu: spec.gpu,
                actor_worker: spec.actor_worker,
                keep_alive_deadline,
            },
        );
        if spec.worker_type.is_io_worker() {
            state.io_state_mut(spec.worker_type).num_starting += 1;
        }
        info!(
            "started {} worker process {handle} with startup token {startup_token}",
            spec.language
        );
        Ok(())
    }

    fn try_pending_start_requests(&mut self, ctx: &mut ActorContext<NodeActor>, language: Language) {
        loop {
            let pending = {
                let Some(state) = self.states_by_language.get_mut(&language) else {
                    return;
                };
                if state.num_startup_slots_in_use() >= self.options.maximum_startup_concurrency {
                    return;
                }
                let Some(pending) = state.pending_start_requests.pop_front() else {
                    return;
                };
                pending
            };
            self.start_new_worker(ctx, pending);
        }
    }

    fn find_matching_idle_worker(&self, request: &PopWorkerRequest) -> Option<WorkerId> {
        let state = self.states_by_language.get(&request.language)?;
        // Newest-first keeps recently used interpreters warm and lets the
        // reclaimer evict from the other end.
        for worker_id in state.idle.iter().rev() {
            let Some(worker) = self.workers.get(worker_id) else {
                continue;
            };
            if let Some(job_id) = worker.job_id {
                if self.jobs.is_finished(job_id) {
                    continue;
                }
            }
            if Self::request_matches_worker(request, worker) {
                return Some(*worker_id);
            }
        }
        None
    }

    fn request_matches_worker(request: &PopWorkerRequest, worker: &WorkerRecord) -> bool {
        if worker.language != request.language
            || worker.worker_type != request.worker_type
            || worker.runtime_env_hash != request.runtime_env_hash
            || worker.dynamic_options != request.dynamic_options
            || worker.gpu != request.gpu
            || worker.actor_worker != request.actor_worker
        {
            return false;
        }
        if let Some(job_id) = worker.job_id {
            if job_id != request.job_id {
                return false;
            }
        }
        // A worker scoped to a detached actor serves requests rooted in
        // the same actor and plain requests of the same job, never
        // requests under a different detached actor.
        match (worker.root_detached_actor_id, request.root_detached_actor_id) {
            (Some(worker_actor), Some(request_actor)) => worker_actor == request_actor,
            _ => true,
        }
    }

    fn take_matching_pending_registration(
        &mut self,
        worker_id: WorkerId,
    ) -> Option<PendingPopWorkerRequest> {
        let worker = self.workers.get(&worker_id)?;
        let language = worker.language;
        let position = {
            let state = self.states_by_language.get(&language)?;
            state
                .pending_registration_requests
                .iter()
                .position(|pending| Self::request_matches_worker(&pending.request, worker))?
        };
        let state = self.states_by_language.get_mut(&language)?;
        state.pending_registration_requests.remove(position)
    }

    fn lease_worker(&mut self, worker_id: WorkerId, request: &PopWorkerRequest) -> Option<WorkerLease> {
        if let Some(state) = self.states_by_language.get_mut(&request.language) {
            state.idle.shift_remove(&worker_id);
        }
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            error!("cannot lease unknown worker {worker_id}");
            return None;
        };
        worker.state = WorkerLifecycle::Leased;
        worker.last_idle_time = None;
        if worker.job_id.is_none() {
            worker.job_id = Some(request.job_id);
        }
        if worker.root_detached_actor_id.is_none() {
            worker.root_detached_actor_id = request.root_detached_actor_id;
        }
        Some(WorkerLease {
            worker_id,
            language: worker.language,
            worker_type: worker.worker_type,
            job_id: worker.job_id,
            root_detached_actor_id: worker.root_detached_actor_id,
            runtime_env_hash: worker.runtime_env_hash,
            client: Arc::clone(&worker.client),
        })
    }

    fn lease_io_worker(&mut self, worker_id: WorkerId) -> Option<WorkerLease> {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            error!("cannot lease unknown I/O worker {worker_id}");
            return None;
        };
        worker.state = WorkerLifecycle::Leased;
        Some(WorkerLease {
            worker_id,
            language: worker.language,
            worker_type: worker.worker_type,
            job_id: worker.job_id,
            root_detached_actor_id: worker.root_detached_actor_id,
            runtime_env_hash: worker.runtime_env_hash,
            client: Arc::clone(&worker.client),
        })
    }

    fn make_worker_idle(&mut self, worker_id: WorkerId) {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            warn!("cannot idle unknown worker {worker_id}");
            return;
        };
        worker.state = WorkerLifecycle::Idle;
        worker.last_idle_time = Some(Instant::now());
        let language = worker.language;
        if let Some(state) = self.states_by_language.get_mut(&language) {
            if !state.idle.insert(worker_id) {
                warn!("worker {worker_id} was already in the idle pool");
            }
        }
    }

    fn is_soft_kill_eligible(&self, worker_id: WorkerId, now: Instant) -> bool {
        let Some(worker) = self.workers.get(&worker_id) else {
            return false;
        };
        if worker
            .keep_alive_deadline
            .is_some_and(|deadline| now < deadline)
        {
            return false;
        }
        match worker.last_idle_time {
            Some(last_idle) => {
                now.duration_since(last_idle) >= self.options.idle_worker_grace_period
            }
            None => false,
        }
    }

    fn kill_idle_worker(&mut self, ctx: &mut ActorContext<NodeActor>, worker_id: WorkerId, force_exit: bool) {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            return;
        };
        if worker.state != WorkerLifecycle::Idle {
            return;
        }
        worker.state = WorkerLifecycle::PendingExit;
        worker.last_idle_time = None;
        let language = worker.language;
        let client = Arc::clone(&worker.client);
        if let Some(state) = self.states_by_language.get_mut(&language) {
            state.idle.shift_remove(&worker_id);
        }
        info!("asking idle worker {worker_id} to exit (force_exit = {force_exit})");
        let handle = ctx.handle().clone();
        client.exit(
            ExitRequest { force_exit },
            Box::new(move |reply| {
                let _ = handle.send(NodeEvent::WorkerExitReplied { worker_id, reply });
            }),
        );
    }

    /// Drops a worker from the pool: all indices, phase bookkeeping, and
    /// the worker's runtime environment reference. The freed startup slot
    /// and I/O capacity are offered to queued work.
    fn remove_worker_record(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        worker_id: WorkerId,
    ) -> Option<WorkerRecord> {
        let mut record = self.workers.remove(&worker_id)?;
        self.registered_by_connection.remove(&record.connection);
        let language = record.language;
        if let Some(state) = self.states_by_language.get_mut(&language) {
            match record.state {
                WorkerLifecycle::PendingAnnounce => {
                    state.starting.remove(&record.startup_token);
                    if record.worker_type.is_io_worker() {
                        let io = state.io_state_mut(record.worker_type);
                        io.num_starting = io.num_starting.saturating_sub(1);
                    }
                }
                WorkerLifecycle::Idle => {
                    state.idle.shift_remove(&worker_id);
                }
                WorkerLifecycle::Leased | WorkerLifecycle::PendingExit | WorkerLifecycle::Dead => {}
            }
            if record.worker_type.is_io_worker() {
                let io = state.io_state_mut(record.worker_type);
                io.started.remove(&worker_id);
                io.idle.retain(|w| *w != worker_id);
            }
        }
        record.state = WorkerLifecycle::Dead;
        if !is_runtime_env_empty(&record.serialized_runtime_env) {
            self.release_runtime_env_reference(&record.serialized_runtime_env);
        }
        self.try_pending_start_requests(ctx, language);
        if record.worker_type.is_io_worker() {
            self.maybe_restart_io_workers(ctx, language, record.worker_type);
        }
        Some(record)
    }

    fn maybe_restart_io_workers(
        &mut self,
        ctx: &mut ActorContext<NodeActor>,
        language: Language,
        worker_type: WorkerType,
    ) {
        let should_start = {
            let Some(state) = self.states_by_language.get(&language) else {
                return;
            };
            let io = state.io_state(worker_type);
            !io.pending_requests.is_empty()
                && io.num_starting + io.started.len() < self.options.max_io_workers
        };
        if should_start {
            self.spawn_worker(ctx, WorkerSpawnSpec::for_io_worker(language, worker_type));
        }
    }

    /// Releases one pool-held reference on a runtime environment and asks
    /// the runtime environment service to drop its reference too.
    fn release_runtime_env_reference(&mut self, serialized_runtime_env: &str) {
        self.runtime_env_refs.remove(serialized_runtime_env);
        self.delete_runtime_env(serialized_runtime_env.to_string());
    }

    fn delete_runtime_env(&self, serialized_runtime_env: String) {
        let descriptor = serialized_runtime_env.clone();
        self.runtime_env_client.delete_runtime_env_if_possible(
            &serialized_runtime_env,
            Box::new(move |success| {
                if !success {
                    warn!("failed to delete runtime environment: {descriptor}");
                }
            }),
        );
    }
}
