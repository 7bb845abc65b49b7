use harbor_actor::actor::{Actor, ActorAction, ActorContext};
use log::info;

use crate::actor::{NodeActor, NodeEvent, NodeOptions};
use crate::pool::{WorkerPool, WorkerPoolOptions};

impl Actor for NodeActor {
    type Message = NodeEvent;
    type Options = NodeOptions;

    fn name() -> &'static str {
        "NodeActor"
    }

    fn new(options: NodeOptions) -> Self {
        let worker_pool = WorkerPool::new(
            WorkerPoolOptions::new(&options),
            options.launcher,
            options.runtime_env_client,
        );
        Self { worker_pool }
    }

    fn start(&mut self, ctx: &mut ActorContext<Self>) {
        let interval = self.worker_pool.options().kill_idle_workers_interval;
        if !interval.is_zero() {
            ctx.send_with_delay(NodeEvent::KillIdleWorkers, interval);
        }
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: NodeEvent) -> ActorAction {
        match message {
            NodeEvent::PopWorker { request } => self.handle_pop_worker(ctx, request),
            NodeEvent::PushWorker { worker_id } => self.handle_push_worker(ctx, worker_id),
            NodeEvent::RegisterWorker {
                registration,
                callback,
            } => self.handle_register_worker(ctx, registration, callback),
            NodeEvent::RegisterDriver {
                registration,
                job_config,
                callback,
            } => self.handle_register_driver(ctx, registration, job_config, callback),
            NodeEvent::AnnounceWorkerPort { worker_id, port } => {
                self.handle_announce_worker_port(ctx, worker_id, port)
            }
            NodeEvent::DisconnectWorker {
                worker_id,
                exit_type,
            } => self.handle_disconnect_worker(ctx, worker_id, exit_type),
            NodeEvent::JobStarted { job_id, config } => {
                self.handle_job_started(ctx, job_id, config)
            }
            NodeEvent::JobFinished { job_id } => self.handle_job_finished(ctx, job_id),
            NodeEvent::PrestartWorkers { request } => self.handle_prestart_workers(ctx, request),
            NodeEvent::PopSpillWorker { callback } => self.handle_pop_spill_worker(ctx, callback),
            NodeEvent::PopRestoreWorker { callback } => {
                self.handle_pop_restore_worker(ctx, callback)
            }
            NodeEvent::PopDeleteWorker { callback } => self.handle_pop_delete_worker(ctx, callback),
            NodeEvent::PushSpillWorker { worker_id }
            | NodeEvent::PushRestoreWorker { worker_id }
            | NodeEvent::PushDeleteWorker { worker_id } => {
                self.handle_push_io_worker(ctx, worker_id)
            }
            NodeEvent::UpdateAvailableCpus { num_cpus } => {
                self.handle_update_available_cpus(ctx, num_cpus)
            }
            NodeEvent::KillIdleWorkers => self.handle_kill_idle_workers(ctx),
            NodeEvent::RuntimeEnvCreated { request_id, result } => {
                self.handle_runtime_env_created(ctx, request_id, result)
            }
            NodeEvent::JobRuntimeEnvPrepared { job_id, result } => {
                self.handle_job_runtime_env_prepared(ctx, job_id, result)
            }
            NodeEvent::RegistrationTimeout { request_id } => {
                self.handle_registration_timeout(ctx, request_id)
            }
            NodeEvent::WorkerExitReplied { worker_id, reply } => {
                self.handle_worker_exit_replied(ctx, worker_id, reply)
            }
            NodeEvent::Shutdown => ActorAction::Stop,
        }
    }

    fn stop(self) {
        info!("the node actor has stopped");
    }
}
