pub mod helpers;
mod tests_delete;
mod tests_layers;
mod tests_scan;
mod tests_snapshots;
