pub mod checkpoint_dir;
