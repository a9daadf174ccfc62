pub mod periodic_evaluation;
