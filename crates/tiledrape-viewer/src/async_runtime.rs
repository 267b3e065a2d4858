//! Runs tile fetches on the platform's async executor.
//!
//! Native builds drive reqwest on the Tokio runtime from `bevy_tokio_tasks`.
//! Browser builds hand futures to Bevy's `AsyncComputeTaskPool`, where
//! reqwest uses `fetch`. Either way [`TaskSpawner`] implements
//! [`tiledrape::TaskSpawn`] and the engine never sees the difference.

use bevy::prelude::*;

/// Plugin that sets up the async runtime for the current platform.
///
/// On native, this adds the Tokio runtime plugin. On WASM, this is a no-op
/// since Bevy's task pool handles async execution.
pub struct AsyncRuntimePlugin;

impl Plugin for AsyncRuntimePlugin {
    fn build(&self, app: &mut App) {
        #[cfg(target_family = "wasm")]
        let _ = app;

        #[cfg(not(target_family = "wasm"))]
        app.add_plugins(bevy_tokio_tasks::TokioTasksPlugin::default());
    }
}

// Native implementation using Tokio.
#[cfg(not(target_family = "wasm"))]
mod native {
    use bevy::ecs::system::SystemParam;
    use bevy::prelude::*;
    use tiledrape::{TaskFuture, TaskSpawn};

    /// Spawns fetches onto the Tokio runtime.
    #[derive(SystemParam)]
    pub struct TaskSpawner<'w, 's> {
        runtime: Res<'w, bevy_tokio_tasks::TokioTasksRuntime>,
        // Add Local<()> to match the WASM signature.
        #[allow(dead_code)]
        _local: Local<'s, ()>,
    }

    impl TaskSpawn for TaskSpawner<'_, '_> {
        fn spawn(&self, task: TaskFuture) {
            self.runtime.spawn_background_task(move |_ctx| task);
        }
    }
}

// WASM implementation using Bevy's task pool.
#[cfg(target_family = "wasm")]
mod wasm {
    use bevy::ecs::system::SystemParam;
    use bevy::prelude::*;
    use bevy::tasks::AsyncComputeTaskPool;
    use tiledrape::{TaskFuture, TaskSpawn};

    /// Spawns fetches onto the local task pool; no runtime resource needed.
    #[derive(SystemParam)]
    pub struct TaskSpawner<'w, 's> {
        // Local<()> is a no-op SystemParam that satisfies the derive requirements.
        #[allow(dead_code)]
        _local: Local<'s, ()>,
        #[allow(dead_code)]
        _marker: std::marker::PhantomData<&'w ()>,
    }

    impl TaskSpawn for TaskSpawner<'_, '_> {
        fn spawn(&self, task: TaskFuture) {
            AsyncComputeTaskPool::get().spawn_local(task).detach();
        }
    }
}

#[cfg(not(target_family = "wasm"))]
pub use native::TaskSpawner;
#[cfg(target_family = "wasm")]
pub use wasm::TaskSpawner;
