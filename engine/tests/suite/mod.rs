mod external_maps;
mod file_store;
mod scenarios;
mod support;
