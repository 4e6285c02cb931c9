mod test_config;
mod test_global_updates;
mod test_picker;
mod test_store;
mod test_token_bucket;
