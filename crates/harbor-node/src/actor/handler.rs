use harbor_actor::actor::{ActorAction, ActorContext};

use crate::actor::{NodeActor, NodeEvent};
use crate::error::NodeResult;
use crate::id::{JobId, RequestId, WorkerId};
use crate::job::JobConfig;
use crate::request::{IoWorkerCallback, PopWorkerRequest, PrestartRequest, RegistrationCallback};
use crate::worker::{
    DriverRegistration, ExitReply, WorkerExitType, WorkerRegistration, WorkerType,
};

impl NodeActor {
    pub(super) fn handle_pop_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        request: PopWorkerRequest,
    ) -> ActorAction {
        self.worker_pool.pop_worker(ctx, request);
        ActorAction::Continue
    }

    pub(super) fn handle_push_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
    ) -> ActorAction {
        self.worker_pool.push_worker(ctx, worker_id);
        ActorAction::Continue
    }

    pub(super) fn handle_register_worker(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        registration: WorkerRegistration,
        callback: RegistrationCallback,
    ) -> ActorAction {
        let result = self.worker_pool.register_worker(registration);
        callback(result);
        ActorAction::Continue
    }

    pub(super) fn handle_register_driver(
        &mut self,
        ctx: &mut ActorContext<Self>,
        registration: DriverRegistration,
        job_config: JobConfig,
        callback: RegistrationCallback,
    ) -> ActorAction {
        self.worker_pool
            .register_driver(ctx, registration, job_config, callback);
        ActorAction::Continue
    }

    pub(super) fn handle_announce_worker_port(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
        port: u16,
    ) -> ActorAction {
        self.worker_pool.on_worker_started(ctx, worker_id, port);
        ActorAction::Continue
    }

    pub(super) fn handle_disconnect_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
        exit_type: WorkerExitType,
    ) -> ActorAction {
        self.worker_pool.disconnect_worker(ctx, worker_id, exit_type);
        ActorAction::Continue
    }

    pub(super) fn handle_job_started(
        &mut self,
        ctx: &mut ActorContext<Self>,
        job_id: JobId,
        config: JobConfig,
    ) -> ActorAction {
        self.worker_pool.handle_job_started(ctx, job_id, config);
        ActorAction::Continue
    }

    pub(super) fn handle_job_finished(
        &mut self,
        ctx: &mut ActorContext<Self>,
        job_id: JobId,
    ) -> ActorAction {
        self.worker_pool.handle_job_finished(ctx, job_id);
        ActorAction::Continue
    }

    pub(super) fn handle_prestart_workers(
        &mut self,
        ctx: &mut ActorContext<Self>,
        request: PrestartRequest,
    ) -> ActorAction {
        self.worker_pool.prestart_workers(ctx, request);
        ActorAction::Continue
    }

    pub(super) fn handle_pop_spill_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        callback: IoWorkerCallback,
    ) -> ActorAction {
        self.worker_pool
            .pop_io_worker(ctx, WorkerType::SpillWorker, callback);
        ActorAction::Continue
    }

    pub(super) fn handle_pop_restore_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        callback: IoWorkerCallback,
    ) -> ActorAction {
        self.worker_pool
            .pop_io_worker(ctx, WorkerType::RestoreWorker, callback);
        ActorAction::Continue
    }

    pub(super) fn handle_pop_delete_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        callback: IoWorkerCallback,
    ) -> ActorAction {
        self.worker_pool.pop_delete_worker(ctx, callback);
        ActorAction::Continue
    }

    pub(super) fn handle_push_io_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
    ) -> ActorAction {
        self.worker_pool.push_io_worker(ctx, worker_id);
        ActorAction::Continue
    }

    pub(super) fn handle_update_available_cpus(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        num_cpus: usize,
    ) -> ActorAction {
        self.worker_pool.update_available_cpus(num_cpus);
        ActorAction::Continue
    }

    pub(super) fn handle_kill_idle_workers(&mut self, ctx: &mut ActorContext<Self>) -> ActorAction {
        self.worker_pool.try_killing_idle_workers(ctx);
        let interval = self.worker_pool.options().kill_idle_workers_interval;
        if !interval.is_zero() {
            ctx.send_with_delay(NodeEvent::KillIdleWorkers, interval);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_runtime_env_created(
        &mut self,
        ctx: &mut ActorContext<Self>,
        request_id: RequestId,
        result: Result<String, String>,
    ) -> ActorAction {
        self.worker_pool
            .on_runtime_env_created(ctx, request_id, result);
        ActorAction::Continue
    }

    pub(super) fn handle_job_runtime_env_prepared(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        job_id: JobId,
        result: Result<String, String>,
    ) -> ActorAction {
        self.worker_pool.on_job_runtime_env_prepared(job_id, result);
        ActorAction::Continue
    }

    pub(super) fn handle_registration_timeout(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        request_id: RequestId,
    ) -> ActorAction {
        self.worker_pool.on_registration_timeout(request_id);
        ActorAction::Continue
    }

    pub(super) fn handle_worker_exit_replied(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
        reply: NodeResult<ExitReply>,
    ) -> ActorAction {
        self.worker_pool.on_worker_exit_replied(ctx, worker_id, reply);
        ActorAction::Continue
    }
}
