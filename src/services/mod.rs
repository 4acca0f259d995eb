pub(crate) mod exam_workflow;
pub(crate) mod job_queue;
pub(crate) mod storage;
