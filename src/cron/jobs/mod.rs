pub mod backfill_images;
