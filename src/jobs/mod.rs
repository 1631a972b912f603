pub mod capacity_watcher;
